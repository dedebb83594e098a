use crate::scanner::ScanSummary;

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif; the persisted scanner status is
/// written independently, so every method defaults to a no-op.
pub trait ProgressReporter: Send + Sync {
    fn on_status(&self, _scanner: &str, _status: &str) {}
    fn on_hash_progress(&self, _files_hashed: usize, _total_files: usize) {}
    fn on_lookup_progress(&self, _lookups_done: usize, _total_lookups: usize) {}
    fn on_scan_complete(&self, _scanner: &str, _summary: &ScanSummary) {}
    fn on_scan_failed(&self, _scanner: &str, _error: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
