use crate::error::Error;
use crate::storage::models::{IgnoreEntry, ScannerRecord};
use crate::storage::{now_unix, Database};
use tracing::{debug, info};

/// Content hashes that must never be (re-)ingested.
pub struct IgnoreList<'a> {
    db: &'a Database,
}

impl<'a> IgnoreList<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// True iff `content_hash` is ignored and `scanner` is not exempt from it.
    pub fn should_ignore(&self, content_hash: &str, scanner: &ScannerRecord) -> Result<bool, Error> {
        Ok(self.db.is_ignored_for_scanner(content_hash, scanner.id)?)
    }

    /// Idempotent: a second call for the same hash keeps the first reason.
    pub fn record_deletion(&self, content_hash: &str, reason: &str) -> Result<bool, Error> {
        let inserted = self
            .db
            .insert_ignore_entry_if_absent(content_hash, reason, now_unix())?;
        if inserted {
            info!("Ignoring {} from now on: {}", content_hash, reason);
        } else {
            debug!("{} is already ignored", content_hash);
        }
        Ok(inserted)
    }

    pub fn get(&self, content_hash: &str) -> Result<Option<IgnoreEntry>, Error> {
        Ok(self.db.get_ignore_entry(content_hash)?)
    }

    pub fn list(&self) -> Result<Vec<IgnoreEntry>, Error> {
        Ok(self.db.list_ignore_entries()?)
    }

    pub fn remove(&self, content_hash: &str) -> Result<bool, Error> {
        Ok(self.db.delete_ignore_entry(content_hash)?)
    }

    /// Let `scanner_id` ingest `content_hash` despite its ignore entry.
    pub fn exempt(&self, scanner_id: i64, content_hash: &str) -> Result<(), Error> {
        let entry = self
            .get(content_hash)?
            .ok_or_else(|| Error::NotFound(format!("ignore entry for {}", content_hash)))?;
        self.db.add_scanner_exemption(scanner_id, entry.id)?;
        Ok(())
    }
}
