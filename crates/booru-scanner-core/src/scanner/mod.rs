pub mod registry;
pub mod scan;
pub mod walk;

pub use registry::{
    create_scanner, delete_scanner, paths_overlap, resolve_root, update_scanner_root, ScannerSpec,
};
pub use scan::{holds_live_lease, reclaim_stale_locks, scan_all, ScanSummary};
