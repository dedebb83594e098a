use crate::consensus::{self, Consensus, ConsensusRules};
use crate::error::Error;
use crate::provider::LookupResult;
use crate::records::ContentRecords;
use crate::storage::models::CacheEntry;
use crate::storage::{now_unix, Database};
use std::time::Duration;
use tracing::{debug, info};

/// One lookup result per (content hash, provider), aged against a threshold.
pub struct StalenessCache<'a> {
    db: &'a Database,
    records: &'a dyn ContentRecords,
    threshold: Duration,
}

impl<'a> StalenessCache<'a> {
    pub fn new(db: &'a Database, records: &'a dyn ContentRecords, threshold: Duration) -> Self {
        Self {
            db,
            records,
            threshold,
        }
    }

    fn threshold_secs(&self) -> i64 {
        i64::try_from(self.threshold.as_secs()).unwrap_or(i64::MAX)
    }

    pub fn get(&self, content_hash: &str, provider_id: i64) -> Result<Option<CacheEntry>, Error> {
        Ok(self.db.get_cache_entry(content_hash, provider_id)?)
    }

    pub fn is_fresh(&self, content_hash: &str, provider_id: i64) -> Result<bool, Error> {
        Ok(self
            .get(content_hash, provider_id)?
            .map(|entry| !entry.is_stale(now_unix(), self.threshold_secs()))
            .unwrap_or(false))
    }

    /// Upsert the provider's answer. Refused with `Error::CacheConflict` once
    /// a canonical record exists for the hash, so cached answers never drift
    /// away from ingested content.
    pub fn put(
        &self,
        content_hash: &str,
        provider_id: i64,
        result: &LookupResult,
    ) -> Result<CacheEntry, Error> {
        if self.records.exists_for_hash(content_hash)? {
            return Err(Error::CacheConflict(content_hash.to_string()));
        }

        let mut entry = CacheEntry {
            id: 0,
            provider_id,
            content_hash: content_hash.to_string(),
            found: result.found,
            tags: result.tags.clone(),
            rating: result.rating.clone(),
            source: result.source.clone(),
            created_at: now_unix(),
        };
        entry.id = self.db.upsert_cache_entry(&entry)?;
        debug!(
            "Cached {} @ provider {} (found: {})",
            content_hash, provider_id, entry.found
        );
        Ok(entry)
    }

    /// Bulk-delete every entry older than the threshold.
    pub fn prune_stale(&self) -> Result<usize, Error> {
        let cutoff = now_unix().saturating_sub(self.threshold_secs());
        let removed = self.db.delete_cache_entries_older_than(cutoff)?;
        info!("Pruned {} stale cache entries", removed);
        Ok(removed)
    }

    /// All entries for a hash, any provider and any age, in first-seen order.
    pub fn entries_for_hash(&self, content_hash: &str) -> Result<Vec<CacheEntry>, Error> {
        Ok(self.db.cache_entries_for_hash(content_hash)?)
    }

    pub fn consensus(&self, content_hash: &str, rules: &ConsensusRules<'_>) -> Result<Consensus, Error> {
        let entries = self.entries_for_hash(content_hash)?;
        Ok(consensus::aggregate(&entries, rules))
    }
}
