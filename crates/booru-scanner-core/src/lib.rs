pub mod cache;
pub mod config;
pub mod consensus;
pub mod error;
pub mod hasher;
pub mod ignore;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod records;
pub mod scanner;
pub mod storage;
pub mod watch;

pub use cache::StalenessCache;
pub use config::AppConfig;
pub use error::Error;
pub use ignore::IgnoreList;
pub use pipeline::Pipeline;
pub use progress::{ProgressReporter, SilentReporter};
pub use scanner::{ScanSummary, ScannerSpec};
