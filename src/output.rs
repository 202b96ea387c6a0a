//! Result files written by the coordinating rank.
//!
//! `Execution_Time.txt` receives timestamped phase markers and solver
//! diagnostics, `Convergence_Result.txt` one line per solved cycle. Both are
//! truncated when the sink is created and appended to afterwards.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cycle::CycleReport;
use crate::driver_error::DriverError;

pub const CONVERGENCE_FILE: &str = "Convergence_Result.txt";
pub const EXECUTION_TIME_FILE: &str = "Execution_Time.txt";

/// Local wall-clock time as `YYYY-MM-DD.HH:MM:SS`.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d.%X").to_string()
}

/// Destination of progress markers and per-cycle results.
pub trait OutputSink {
    /// Append a progress line; the sink adds the timestamp.
    fn progress(&mut self, message: &str) -> Result<(), DriverError>;

    /// Append a plain diagnostic line.
    fn note(&mut self, message: &str) -> Result<(), DriverError>;

    /// Record the result of one solved cycle.
    fn convergence(&mut self, report: &CycleReport) -> Result<(), DriverError>;
}

/// One whitespace-separated line of the convergence file: order, level,
/// elements, DOFs, reason code, iterations, accuracy, L2 error and the three
/// phase timings.
pub fn convergence_line(report: &CycleReport) -> String {
    let accuracy = report
        .accuracy
        .map_or_else(|| "nan".to_string(), |a| format!("{a:.6e}"));
    format!(
        "{} {} {} {} {} {} {} {:.6e} {:.6} {:.6} {:.6}",
        report.order,
        report.level,
        report.global_elements,
        report.global_dofs,
        report.reason.code(),
        report.iterations,
        accuracy,
        report.l2_error,
        report.timings.assembly.as_secs_f64(),
        report.timings.solve.as_secs_f64(),
        report.timings.local_solve.as_secs_f64(),
    )
}

/// The two result files in an output directory.
#[derive(Debug)]
pub struct OutputFiles {
    convergence: PathBuf,
    execution_time: PathBuf,
}

impl OutputFiles {
    /// Create (or truncate) both files in `dir`. Coordinator only.
    pub fn create(dir: &Path) -> Result<Self, DriverError> {
        std::fs::create_dir_all(dir)?;
        let convergence = dir.join(CONVERGENCE_FILE);
        let execution_time = dir.join(EXECUTION_TIME_FILE);
        File::create(&convergence)?;
        File::create(&execution_time)?;
        Ok(Self {
            convergence,
            execution_time,
        })
    }

    pub fn convergence_path(&self) -> &Path {
        &self.convergence
    }

    pub fn execution_time_path(&self) -> &Path {
        &self.execution_time
    }

    fn append(path: &Path, line: &str) -> Result<(), DriverError> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

impl OutputSink for OutputFiles {
    fn progress(&mut self, message: &str) -> Result<(), DriverError> {
        Self::append(&self.execution_time, &format!("{message} : {}", timestamp()))
    }

    fn note(&mut self, message: &str) -> Result<(), DriverError> {
        Self::append(&self.execution_time, message)
    }

    fn convergence(&mut self, report: &CycleReport) -> Result<(), DriverError> {
        Self::append(&self.convergence, &convergence_line(report))
    }
}

/// Keeps everything in memory; used by tests and non-coordinating ranks.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub progress: Vec<String>,
    pub notes: Vec<String>,
    pub reports: Vec<CycleReport>,
}

impl OutputSink for MemorySink {
    fn progress(&mut self, message: &str) -> Result<(), DriverError> {
        self.progress.push(message.to_string());
        Ok(())
    }

    fn note(&mut self, message: &str) -> Result<(), DriverError> {
        self.notes.push(message.to_string());
        Ok(())
    }

    fn convergence(&mut self, report: &CycleReport) -> Result<(), DriverError> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_has_date_and_time() {
        let ts = timestamp();
        let (date, time) = ts.split_once('.').unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(time.split(':').count(), 3);
    }

    #[test]
    fn fresh_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONVERGENCE_FILE), "old run\n").unwrap();
        let files = OutputFiles::create(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(files.convergence_path()).unwrap(), "");
        assert_eq!(std::fs::read_to_string(files.execution_time_path()).unwrap(), "");
    }
}
