#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use booru_scanner_core::hasher::content_hash;
use booru_scanner_core::provider::{LookupResult, ProviderClient, ProviderConnector};
use booru_scanner_core::records::{
    ContentRecords, CreatedRecord, IngestObserver, LocalRecordStore, RecordDraft,
};
use booru_scanner_core::storage::models::{Provider, ScannerRecord};
use booru_scanner_core::storage::Database;
use booru_scanner_core::{scanner, AppConfig, Error, Pipeline, ScannerSpec};

pub const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Write a PNG-signed file whose content (and hash) depends on `seed`.
pub fn write_png(dir: &Path, name: &str, seed: &str) -> (PathBuf, String) {
    let path = dir.join(name);
    let mut bytes = PNG_HEADER.to_vec();
    bytes.extend_from_slice(seed.as_bytes());
    fs::write(&path, bytes).unwrap();
    let hash = content_hash(&path).unwrap();
    (path, hash)
}

pub fn found(tags: &str, rating: &str, source: Option<&str>) -> LookupResult {
    LookupResult {
        found: true,
        tags: tags.to_string(),
        rating: rating.to_string(),
        source: source.map(str::to_string),
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        lookup_workers: 2,
        ..AppConfig::default()
    }
}

#[derive(Default)]
struct FakeState {
    answers: Mutex<HashMap<(String, String), LookupResult>>,
    failing: Mutex<HashSet<String>>,
    unreachable: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

/// Provider connector answering from an in-memory table keyed by base URL and hash.
/// Unknown hashes are "not found".
#[derive(Default)]
pub struct FakeConnector {
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, base_url: &str, hash: &str, result: LookupResult) {
        self.state
            .answers
            .lock()
            .unwrap()
            .insert((base_url.to_string(), hash.to_string()), result);
    }

    /// Every lookup against `base_url` fails with a transport error.
    pub fn fail(&self, base_url: &str) {
        self.state.failing.lock().unwrap().insert(base_url.to_string());
    }

    pub fn set_unreachable(&self, base_url: &str) {
        self.state.unreachable.lock().unwrap().insert(base_url.to_string());
    }

    /// Every lookup sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

struct FakeClient {
    base_url: String,
    state: Arc<FakeState>,
}

impl ProviderClient for FakeClient {
    fn lookup(&self, content_hash: &str) -> Result<LookupResult, Error> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if self.state.failing.lock().unwrap().contains(&self.base_url) {
            return Err(Error::Transport(format!("{} is down", self.base_url)));
        }
        Ok(self
            .state
            .answers
            .lock()
            .unwrap()
            .get(&(self.base_url.clone(), content_hash.to_string()))
            .cloned()
            .unwrap_or_else(LookupResult::not_found))
    }

    fn is_reachable(&self) -> bool {
        !self.state.unreachable.lock().unwrap().contains(&self.base_url)
    }
}

impl ProviderConnector for FakeConnector {
    fn connect(&self, provider: &Provider) -> Box<dyn ProviderClient> {
        Box::new(FakeClient {
            base_url: provider.base_url.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

/// Record store that refuses every file.
pub struct FailingRecords;

impl ContentRecords for FailingRecords {
    fn exists_for_hash(&self, _content_hash: &str) -> Result<bool, Error> {
        Ok(false)
    }

    fn create_from_file(
        &self,
        path: &Path,
        _owner: Option<&str>,
        _draft: &RecordDraft,
    ) -> Result<CreatedRecord, Error> {
        Err(Error::Ingest(format!("refusing {}", path.display())))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub created: Mutex<Vec<CreatedRecord>>,
}

impl IngestObserver for RecordingObserver {
    fn on_record_created(&self, record: &CreatedRecord) {
        self.created.lock().unwrap().push(record.clone());
    }
}

/// Database, record store, fake providers, and the pipeline tying them together.
pub struct Harness {
    pub db: Database,
    pub records: Arc<LocalRecordStore>,
    pub connector: Arc<FakeConnector>,
    pub pipeline: Pipeline,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let db = Database::open_in_memory().unwrap();
        Self::with_db(db, config)
    }

    pub fn with_db(db: Database, config: AppConfig) -> Self {
        let records = Arc::new(LocalRecordStore::open_in_memory().unwrap());
        let connector = FakeConnector::new();
        let pipeline = Pipeline::new(config, records.clone(), connector.clone());
        Self {
            db,
            records,
            connector,
            pipeline,
        }
    }

    pub fn add_provider(&self, name: &str, base_url: &str) -> i64 {
        self.db.insert_provider(name, base_url).unwrap()
    }

    pub fn add_scanner(&self, name: &str, root: &Path) -> ScannerRecord {
        self.add_scanner_with(ScannerSpec {
            name: name.to_string(),
            root_path: root.to_path_buf(),
            ..ScannerSpec::default()
        })
    }

    pub fn add_scanner_with(&self, spec: ScannerSpec) -> ScannerRecord {
        scanner::create_scanner(&self.db, &spec).unwrap()
    }
}
