pub mod models;
mod queries;
mod sqlite;

pub use sqlite::Database;

/// Current wall-clock time as unix seconds, the unit every timestamp column uses.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
