//! Progress callbacks for scheduler runs.

use crate::scheduler::RunReport;

/// Progress callback for reporting scheduler status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a dataset's job starts running.
    fn job_started(&self, dataset: &str);
    /// Called when a dataset's job finishes, successfully or not.
    fn job_finished(&self, dataset: &str, ok: bool);
    /// Called when the run completes without error.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn job_started(&self, _dataset: &str) {}
    fn job_finished(&self, _dataset: &str, _ok: bool) {}
    fn done(&self, _report: &RunReport) {}
}
