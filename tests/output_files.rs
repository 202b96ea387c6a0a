use std::fs;

use hdg_sieve::algs::communicator::NoComm;
use hdg_sieve::config::RunConfig;
use hdg_sieve::cycle::{CycleOrchestrator, SolveCycle};
use hdg_sieve::hdg::HdgDiffusion1d;
use hdg_sieve::mesh::interval::IntervalMesh;
use hdg_sieve::output::{CONVERGENCE_FILE, EXECUTION_TIME_FILE, OutputFiles, OutputSink};
use hdg_sieve::solver::KspConfig;
use serial_test::serial;

#[test]
fn files_are_truncated_then_appended() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(CONVERGENCE_FILE), "stale\n").unwrap();
    fs::write(dir.path().join(EXECUTION_TIME_FILE), "stale\n").unwrap();

    let mut files = OutputFiles::create(dir.path()).unwrap();
    let mut mesh = IntervalMesh::new(0.0, 1.0, 2, 0, 1);
    let cycle = SolveCycle::setup(&NoComm, &mut mesh, 1, 2).unwrap();
    let (report, _) = cycle
        .run(&HdgDiffusion1d::default(), &KspConfig::default(), Some(&mut files))
        .unwrap();
    files.note("done").unwrap();

    let convergence = fs::read_to_string(files.convergence_path()).unwrap();
    let lines: Vec<&str> = convergence.lines().collect();
    assert_eq!(lines.len(), 1);
    let fields: Vec<&str> = lines[0].split_whitespace().collect();
    assert_eq!(fields[..4], ["1", "2", "8", "7"]);
    assert_eq!(fields[4], report.reason.code().to_string());

    let timing = fs::read_to_string(files.execution_time_path()).unwrap();
    assert!(!timing.contains("stale"));
    assert!(timing.lines().any(|l| l.starts_with("Entering assembly : ")));
    assert!(timing.lines().any(|l| l.starts_with("Converged reason is: ")));
    assert_eq!(timing.lines().last(), Some("done"));
}

#[test]
fn missing_parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let files = OutputFiles::create(&nested).unwrap();
    assert!(files.execution_time_path().exists());
}

#[test]
#[serial]
fn driver_run_with_logging_writes_one_line_per_cycle() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let (config, warnings) = RunConfig::from_args(["-p_0", "1", "-p_n", "3", "-h_0", "1", "-h_n", "3"]);
    assert!(warnings.is_empty());
    let mut files = OutputFiles::create(dir.path()).unwrap();
    let outcomes = CycleOrchestrator::new(&NoComm, &config, HdgDiffusion1d::default(), |_| {
        IntervalMesh::new(0.0, 1.0, 2, 0, 1).with_adaptive(true)
    })
    .run(&mut files);
    assert_eq!(outcomes.len(), 4);
    let convergence = fs::read_to_string(files.convergence_path()).unwrap();
    assert_eq!(convergence.lines().count(), 4);
}
