/// An external metadata source, identified by name and base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    pub base_url: String,
}

/// One provider's answer for one content hash. Unique per (content_hash, provider_id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: i64,
    pub provider_id: i64,
    pub content_hash: String,
    pub found: bool,
    /// Space-delimited, as the provider returned them.
    pub tags: String,
    pub rating: String,
    pub source: Option<String>,
    pub created_at: i64,
}

impl CacheEntry {
    pub fn is_stale(&self, now: i64, threshold_secs: i64) -> bool {
        now - self.created_at > threshold_secs
    }
}

/// A content hash that must never be (re-)ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreEntry {
    pub id: i64,
    pub content_hash: String,
    pub reason: String,
    pub created_at: i64,
}

/// A watched root plus everything a scan of it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannerRecord {
    pub id: i64,
    pub name: String,
    pub root_path: String,
    pub owner: Option<String>,
    pub auto_prune_results: bool,
    pub active: bool,
    pub heartbeat_at: Option<i64>,
    pub status: String,
    pub status_updated_at: Option<i64>,
    pub auto_tags: Vec<String>,
    pub failure_tags: Vec<String>,
    pub provider_ids: Vec<i64>,
    pub exemption_ids: Vec<i64>,
}

/// A watched path; at most one per distinct scanner root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDaemonRecord {
    pub id: i64,
    pub path: String,
    pub is_running: bool,
}

/// Row of the in-tree canonical record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecordRow {
    pub id: i64,
    pub content_hash: String,
    pub path: String,
    pub owner: Option<String>,
    pub rating: String,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub created_at: i64,
}
