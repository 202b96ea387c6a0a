use log::{error, info, warn};

use hdg_sieve::algs::communicator::Communicator;
use hdg_sieve::config::{RunConfig, usage};
use hdg_sieve::cycle::{CycleOrchestrator, CycleOutcome};
use hdg_sieve::hdg::HdgDiffusion1d;
use hdg_sieve::mesh::interval::IntervalMesh;
use hdg_sieve::output::{MemorySink, OutputFiles, OutputSink};

/// One rank's share of the run.
fn run_rank<C: Communicator>(comm: &C, config: &RunConfig) -> Vec<CycleOutcome> {
    let mut sink: Box<dyn OutputSink> = if comm.is_coordinator() {
        match OutputFiles::create(&config.output_dir) {
            Ok(files) => Box::new(files),
            Err(e) => {
                error!("cannot create result files in {}: {e}", config.output_dir.display());
                Box::new(MemorySink::default())
            }
        }
    } else {
        Box::new(MemorySink::default())
    };
    let operator = HdgDiffusion1d::default().with_face_basis(config.face_basis);
    let (rank, size) = (comm.rank(), comm.size());
    let mut orchestrator = CycleOrchestrator::new(comm, config, operator, |_order| {
        IntervalMesh::new(0.0, 1.0, config.base_elements, rank, size)
            .with_adaptive(config.adaptive)
    });
    orchestrator.run(sink.as_mut())
}

fn summarize(outcomes: &[CycleOutcome]) {
    let failed = outcomes.iter().filter(|o| !o.is_solved()).count();
    info!("{} cycles run, {failed} failed", outcomes.len());
}

#[cfg(feature = "mpi-support")]
fn run(config: &RunConfig) {
    let Some(_universe) = mpi::initialize() else {
        error!("MPI is already initialized");
        return;
    };
    if config.ranks > 1 {
        warn!("-ranks is ignored when running under MPI");
    }
    let comm = hdg_sieve::algs::communicator::MpiComm::new();
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(1).build_global() {
        warn!("could not limit the thread pool: {e}");
    }
    let outcomes = run_rank(&comm, config);
    if comm.is_coordinator() {
        summarize(&outcomes);
    }
}

#[cfg(not(feature = "mpi-support"))]
fn run(config: &RunConfig) {
    use hdg_sieve::algs::communicator::{NoComm, RayonComm};

    if config.ranks <= 1 {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(1).build_global() {
            warn!("could not limit the thread pool: {e}");
        }
        summarize(&run_rank(&NoComm, config));
        return;
    }
    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.ranks)
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            error!("cannot start {} simulated ranks: {e}", config.ranks);
            return;
        }
    };
    let world = RayonComm::world(config.ranks);
    let mut coordinator_outcomes = Vec::new();
    pool.scope(|s| {
        let mut comms = world.into_iter();
        let coordinator = comms.next();
        for comm in comms {
            s.spawn(move |_| {
                run_rank(&comm, config);
            });
        }
        if let Some(comm) = coordinator {
            coordinator_outcomes = run_rank(&comm, config);
        }
    });
    summarize(&coordinator_outcomes);
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (config, warnings) = RunConfig::from_args(std::env::args().skip(1));
    for warning in &warnings {
        warn!("{warning}");
    }
    if !warnings.is_empty() {
        eprintln!("{}", usage());
    }
    info!(
        "orders [{}, {}), levels [{}, {}), amr {}, face basis {}",
        config.p_0,
        config.p_n,
        config.h_0,
        config.h_n,
        u8::from(config.adaptive),
        config.face_basis
    );
    run(&config);
}
