//! The canonical-record side of ingestion.
//!
//! The scanner only needs to ask whether a hash is already ingested and to
//! request creation of a record from a file. `LocalRecordStore` is the
//! in-tree implementation backed by the same SQLite schema.

use crate::error::Error;
use crate::ignore::IgnoreList;
use crate::storage::models::ContentRecordRow;
use crate::storage::{now_unix, Database};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// What the consensus step decided for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub content_hash: String,
    pub rating: String,
    pub source: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRecord {
    pub id: i64,
    pub content_hash: String,
    pub path: PathBuf,
}

pub trait ContentRecords: Send + Sync {
    fn exists_for_hash(&self, content_hash: &str) -> Result<bool, Error>;

    /// Fails with `Error::Ingest` when the file cannot be turned into a record.
    fn create_from_file(
        &self,
        path: &Path,
        owner: Option<&str>,
        draft: &RecordDraft,
    ) -> Result<CreatedRecord, Error>;
}

/// Notified after a record is materialized, e.g. to kick off tag automation.
pub trait IngestObserver: Send + Sync {
    fn on_record_created(&self, record: &CreatedRecord);
}

pub struct LocalRecordStore {
    db: Mutex<Database>,
}

impl LocalRecordStore {
    pub fn open(path: &str) -> Result<Self, Error> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, Error> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
        })
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T, Error>) -> Result<T, Error> {
        let db = self
            .db
            .lock()
            .map_err(|e| Error::Other(format!("Record store lock poisoned: {}", e)))?;
        f(&db)
    }

    pub fn get(&self, content_hash: &str) -> Result<Option<ContentRecordRow>, Error> {
        self.with_db(|db| Ok(db.get_content_record(content_hash)?))
    }

    pub fn list(&self) -> Result<Vec<ContentRecordRow>, Error> {
        self.with_db(|db| Ok(db.list_content_records()?))
    }

    /// Delete the record and tell the ignore list, so the next scan does not
    /// silently ingest the same content again.
    pub fn delete(&self, content_hash: &str, reason: &str, ignore: &IgnoreList<'_>) -> Result<bool, Error> {
        let removed = self.with_db(|db| Ok(db.delete_content_record(content_hash)?))?;
        if removed {
            info!("Deleted record {}", content_hash);
            ignore.record_deletion(content_hash, reason)?;
        }
        Ok(removed)
    }
}

impl ContentRecords for LocalRecordStore {
    fn exists_for_hash(&self, content_hash: &str) -> Result<bool, Error> {
        self.with_db(|db| Ok(db.content_record_exists(content_hash)?))
    }

    fn create_from_file(
        &self,
        path: &Path,
        owner: Option<&str>,
        draft: &RecordDraft,
    ) -> Result<CreatedRecord, Error> {
        check_media_signature(path)?;
        let path_str = path.to_string_lossy().into_owned();
        let id = self.with_db(|db| {
            if db.content_record_exists(&draft.content_hash)? {
                return Err(Error::Ingest(format!(
                    "record for {} already exists",
                    draft.content_hash
                )));
            }
            Ok(db.insert_content_record(
                &draft.content_hash,
                &path_str,
                owner,
                &draft.rating,
                draft.source.as_deref(),
                &draft.tags,
                now_unix(),
            )?)
        })?;
        debug!("Created record {} for {}", id, path.display());
        Ok(CreatedRecord {
            id,
            content_hash: draft.content_hash.clone(),
            path: path.to_path_buf(),
        })
    }
}

/// Reject files whose leading bytes do not match their extension.
fn check_media_signature(path: &Path) -> Result<(), Error> {
    let mut header = [0u8; 16];
    let read = File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .map_err(|e| Error::Ingest(format!("cannot read {}: {}", path.display(), e)))?;
    let header = &header[..read];

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let valid = match ext.as_str() {
        "jpg" | "jpeg" => header.starts_with(&[0xFF, 0xD8, 0xFF]),
        "png" => header.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
        "gif" => header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a"),
        "webp" => header.len() >= 12 && &header[..4] == b"RIFF" && &header[8..12] == b"WEBP",
        "webm" => header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
        "mp4" => header.len() >= 8 && &header[4..8] == b"ftyp",
        _ => !header.is_empty(),
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Ingest(format!(
            "{} is not a valid {} file",
            path.display(),
            if ext.is_empty() { "media" } else { ext.as_str() }
        )))
    }
}
