/// Trait for reporting refresh and staging progress.
///
/// The CLI implements it with indicatif progress bars. Methods called from worker
/// threads are marked as such. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_refresh_start(&self, _cached: usize, _to_enumerate: usize) {}
    /// Called from worker threads.
    fn on_sample_enumerated(&self, _sample: &str, _files_added: usize) {}
    fn on_refresh_complete(&self, _samples: usize, _duration_secs: f64) {}
    fn on_stage_start(&self, _files: usize) {}
    /// Called from worker threads.
    fn on_file_staged(&self, _path: &str, _transferred: bool) {}
    fn on_stage_complete(&self, _files: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
