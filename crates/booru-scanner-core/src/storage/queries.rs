use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, Result, Row};
use tracing::debug;

const SCANNER_COLUMNS: &str = "id, name, root_path, owner, auto_prune_results, active, \
                               heartbeat_at, status, status_updated_at";

fn cache_entry_from_row(row: &Row<'_>) -> Result<CacheEntry> {
    Ok(CacheEntry {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        content_hash: row.get(2)?,
        found: row.get(3)?,
        tags: row.get(4)?,
        rating: row.get(5)?,
        source: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn scanner_from_row(row: &Row<'_>) -> Result<ScannerRecord> {
    Ok(ScannerRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        root_path: row.get(2)?,
        owner: row.get(3)?,
        auto_prune_results: row.get(4)?,
        active: row.get(5)?,
        heartbeat_at: row.get(6)?,
        status: row.get(7)?,
        status_updated_at: row.get(8)?,
        auto_tags: Vec::new(),
        failure_tags: Vec::new(),
        provider_ids: Vec::new(),
        exemption_ids: Vec::new(),
    })
}

fn content_record_from_row(row: &Row<'_>) -> Result<ContentRecordRow> {
    let tags: String = row.get(6)?;
    Ok(ContentRecordRow {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        path: row.get(2)?,
        owner: row.get(3)?,
        rating: row.get(4)?,
        source: row.get(5)?,
        tags: tags.split_whitespace().map(str::to_string).collect(),
        created_at: row.get(7)?,
    })
}

impl Database {
    // ── Providers ────────────────────────────────────────────────

    pub fn insert_provider(&self, name: &str, base_url: &str) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO provider (name, base_url) VALUES (?1, ?2)",
            params![name, base_url],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn get_provider(&self, id: i64) -> Result<Option<Provider>> {
        match self.connection().query_row(
            "SELECT id, name, base_url FROM provider WHERE id = ?1",
            params![id],
            |row| {
                Ok(Provider {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    base_url: row.get(2)?,
                })
            },
        ) {
            Ok(provider) => Ok(Some(provider)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_providers(&self) -> Result<Vec<Provider>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, name, base_url FROM provider ORDER BY id")?;
        let providers = stmt
            .query_map([], |row| {
                Ok(Provider {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    base_url: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(providers)
    }

    pub fn delete_provider(&self, id: i64) -> Result<bool> {
        let removed = self
            .connection()
            .execute("DELETE FROM provider WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    // ── Cache Entries ────────────────────────────────────────────

    pub fn get_cache_entry(&self, content_hash: &str, provider_id: i64) -> Result<Option<CacheEntry>> {
        match self.connection().query_row(
            "SELECT id, provider_id, content_hash, found, tags, rating, source, created_at \
             FROM cache_entry WHERE content_hash = ?1 AND provider_id = ?2",
            params![content_hash, provider_id],
            cache_entry_from_row,
        ) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Insert or overwrite the row for (content_hash, provider_id). The row id
    /// is kept on overwrite, so iteration order stays first-seen order.
    pub fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<i64> {
        self.connection().query_row(
            "INSERT INTO cache_entry \
             (provider_id, content_hash, found, tags, rating, source, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(content_hash, provider_id) DO UPDATE SET \
                 found = excluded.found, \
                 tags = excluded.tags, \
                 rating = excluded.rating, \
                 source = excluded.source, \
                 created_at = excluded.created_at \
             RETURNING id",
            params![
                entry.provider_id,
                entry.content_hash,
                entry.found,
                entry.tags,
                entry.rating,
                entry.source,
                entry.created_at,
            ],
            |row| row.get(0),
        )
    }

    pub fn cache_entries_for_hash(&self, content_hash: &str) -> Result<Vec<CacheEntry>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, provider_id, content_hash, found, tags, rating, source, created_at \
             FROM cache_entry WHERE content_hash = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map(params![content_hash], cache_entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn delete_cache_entries_older_than(&self, cutoff: i64) -> Result<usize> {
        let removed = self.connection().execute(
            "DELETE FROM cache_entry WHERE created_at < ?1",
            params![cutoff],
        )?;
        debug!("Pruned {} cache entries created before {}", removed, cutoff);
        Ok(removed)
    }

    pub fn count_cache_entries(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM cache_entry", [], |row| row.get(0))
    }

    // ── Ignore Entries ───────────────────────────────────────────

    /// Returns true when a new row was written; an existing entry keeps its reason.
    pub fn insert_ignore_entry_if_absent(
        &self,
        content_hash: &str,
        reason: &str,
        now: i64,
    ) -> Result<bool> {
        let inserted = self.connection().execute(
            "INSERT INTO ignore_entry (content_hash, reason, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(content_hash) DO NOTHING",
            params![content_hash, reason, now],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_ignore_entry(&self, content_hash: &str) -> Result<Option<IgnoreEntry>> {
        match self.connection().query_row(
            "SELECT id, content_hash, reason, created_at FROM ignore_entry WHERE content_hash = ?1",
            params![content_hash],
            |row| {
                Ok(IgnoreEntry {
                    id: row.get(0)?,
                    content_hash: row.get(1)?,
                    reason: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        ) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_ignore_entries(&self) -> Result<Vec<IgnoreEntry>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, content_hash, reason, created_at FROM ignore_entry ORDER BY id",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(IgnoreEntry {
                    id: row.get(0)?,
                    content_hash: row.get(1)?,
                    reason: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn delete_ignore_entry(&self, content_hash: &str) -> Result<bool> {
        let removed = self.connection().execute(
            "DELETE FROM ignore_entry WHERE content_hash = ?1",
            params![content_hash],
        )?;
        Ok(removed > 0)
    }

    /// True iff the hash is ignored and the scanner holds no exemption for it.
    pub fn is_ignored_for_scanner(&self, content_hash: &str, scanner_id: i64) -> Result<bool> {
        self.connection().query_row(
            "SELECT EXISTS ( \
                 SELECT 1 FROM ignore_entry ie \
                 WHERE ie.content_hash = ?1 \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM scanner_ignore_exemption x \
                       WHERE x.scanner_id = ?2 AND x.ignore_id = ie.id))",
            params![content_hash, scanner_id],
            |row| row.get(0),
        )
    }

    pub fn add_scanner_exemption(&self, scanner_id: i64, ignore_id: i64) -> Result<()> {
        self.connection().execute(
            "INSERT OR IGNORE INTO scanner_ignore_exemption (scanner_id, ignore_id) VALUES (?1, ?2)",
            params![scanner_id, ignore_id],
        )?;
        Ok(())
    }

    // ── Scanners ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn insert_scanner(
        &self,
        name: &str,
        root_path: &str,
        owner: Option<&str>,
        auto_prune_results: bool,
        auto_tags: &[String],
        failure_tags: &[String],
        provider_ids: &[i64],
    ) -> Result<i64> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO scanner (name, root_path, owner, auto_prune_results) \
             VALUES (?1, ?2, ?3, ?4)",
            params![name, root_path, owner, auto_prune_results],
        )?;
        let scanner_id = tx.last_insert_rowid();
        {
            let mut auto_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO scanner_auto_tag (scanner_id, tag) VALUES (?1, ?2)",
            )?;
            for tag in auto_tags {
                auto_stmt.execute(params![scanner_id, tag])?;
            }
            let mut failure_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO scanner_failure_tag (scanner_id, tag) VALUES (?1, ?2)",
            )?;
            for tag in failure_tags {
                failure_stmt.execute(params![scanner_id, tag])?;
            }
            let mut provider_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO scanner_provider (scanner_id, provider_id) VALUES (?1, ?2)",
            )?;
            for provider_id in provider_ids {
                provider_stmt.execute(params![scanner_id, provider_id])?;
            }
        }
        tx.commit()?;
        debug!("Inserted scanner {} ({}) at {}", scanner_id, name, root_path);
        Ok(scanner_id)
    }

    fn hydrate_scanner(&self, scanner: &mut ScannerRecord) -> Result<()> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT tag FROM scanner_auto_tag WHERE scanner_id = ?1 ORDER BY tag")?;
        scanner.auto_tags = stmt
            .query_map(params![scanner.id], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;

        let mut stmt = self.connection().prepare_cached(
            "SELECT tag FROM scanner_failure_tag WHERE scanner_id = ?1 ORDER BY tag",
        )?;
        scanner.failure_tags = stmt
            .query_map(params![scanner.id], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;

        let mut stmt = self.connection().prepare_cached(
            "SELECT provider_id FROM scanner_provider WHERE scanner_id = ?1 ORDER BY provider_id",
        )?;
        scanner.provider_ids = stmt
            .query_map(params![scanner.id], |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;

        let mut stmt = self.connection().prepare_cached(
            "SELECT ignore_id FROM scanner_ignore_exemption WHERE scanner_id = ?1 ORDER BY ignore_id",
        )?;
        scanner.exemption_ids = stmt
            .query_map(params![scanner.id], |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;
        Ok(())
    }

    fn query_one_scanner(&self, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<ScannerRecord>> {
        let sql = format!("SELECT {} FROM scanner WHERE {} ORDER BY id LIMIT 1", SCANNER_COLUMNS, clause);
        match self.connection().query_row(&sql, [value], scanner_from_row) {
            Ok(mut scanner) => {
                self.hydrate_scanner(&mut scanner)?;
                Ok(Some(scanner))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_scanner(&self, id: i64) -> Result<Option<ScannerRecord>> {
        self.query_one_scanner("id = ?1", &id)
    }

    pub fn get_scanner_by_name(&self, name: &str) -> Result<Option<ScannerRecord>> {
        self.query_one_scanner("name = ?1", &name)
    }

    /// First scanner (by id) rooted exactly at `root_path`.
    pub fn find_scanner_by_root(&self, root_path: &str) -> Result<Option<ScannerRecord>> {
        self.query_one_scanner("root_path = ?1", &root_path)
    }

    pub fn list_scanners(&self) -> Result<Vec<ScannerRecord>> {
        let sql = format!("SELECT {} FROM scanner ORDER BY id", SCANNER_COLUMNS);
        let mut stmt = self.connection().prepare(&sql)?;
        let mut scanners = stmt
            .query_map([], scanner_from_row)?
            .collect::<Result<Vec<_>>>()?;
        for scanner in scanners.iter_mut() {
            self.hydrate_scanner(scanner)?;
        }
        Ok(scanners)
    }

    pub fn update_scanner_root(&self, id: i64, root_path: &str) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE scanner SET root_path = ?1 WHERE id = ?2",
            params![root_path, id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_scanner(&self, id: i64) -> Result<bool> {
        let removed = self
            .connection()
            .execute("DELETE FROM scanner WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Take the single-flight lease. Succeeds when the scanner is idle or its
    /// heartbeat is older than `lease_secs`; `token` identifies the new holder.
    pub fn try_acquire_scanner(
        &self,
        id: i64,
        token: &str,
        now: i64,
        lease_secs: i64,
        status: &str,
    ) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE scanner SET active = 1, lease_token = ?1, heartbeat_at = ?2, \
                 status = ?3, status_updated_at = ?2 \
             WHERE id = ?4 AND (active = 0 OR COALESCE(heartbeat_at, 0) < ?2 - ?5)",
            params![token, now, status, id, lease_secs],
        )?;
        Ok(updated == 1)
    }

    /// Refresh the heartbeat, and the status text when given. Returns false
    /// once `token` no longer holds the lease.
    pub fn refresh_scanner_lease(
        &self,
        id: i64,
        token: &str,
        status: Option<&str>,
        now: i64,
    ) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE scanner SET heartbeat_at = ?1, \
                 status = COALESCE(?2, status), \
                 status_updated_at = CASE WHEN ?2 IS NULL THEN status_updated_at ELSE ?1 END \
             WHERE id = ?3 AND active = 1 AND lease_token = ?4",
            params![now, status, id, token],
        )?;
        Ok(updated == 1)
    }

    /// Drop the lease and leave `status` behind. A no-op returning false when
    /// `token` was already displaced by another holder.
    pub fn release_scanner(&self, id: i64, token: &str, status: &str, now: i64) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE scanner SET active = 0, lease_token = NULL, heartbeat_at = NULL, \
                 status = ?1, status_updated_at = ?2 \
             WHERE id = ?3 AND lease_token = ?4",
            params![status, now, id, token],
        )?;
        Ok(updated == 1)
    }

    /// Force the lock flag without a lease token, as `scanner unlock` does.
    pub fn set_scanner_active(&self, id: i64, active: bool, now: i64) -> Result<bool> {
        let heartbeat = if active { Some(now) } else { None };
        let updated = self.connection().execute(
            "UPDATE scanner SET active = ?1, heartbeat_at = ?2, lease_token = NULL WHERE id = ?3",
            params![active, heartbeat, id],
        )?;
        Ok(updated > 0)
    }

    pub fn reclaim_stale_scanner_locks(&self, now: i64, lease_secs: i64) -> Result<usize> {
        let reclaimed = self.connection().execute(
            "UPDATE scanner SET active = 0, heartbeat_at = NULL, lease_token = NULL, \
                 status = 'Lock reclaimed after missed heartbeat', status_updated_at = ?1 \
             WHERE active = 1 AND COALESCE(heartbeat_at, 0) < ?1 - ?2",
            params![now, lease_secs],
        )?;
        Ok(reclaimed)
    }

    // ── Watch Daemons ────────────────────────────────────────────

    pub fn insert_watch_daemon_if_absent(&self, path: &str) -> Result<bool> {
        let inserted = self.connection().execute(
            "INSERT INTO watch_daemon (path) VALUES (?1) ON CONFLICT(path) DO NOTHING",
            params![path],
        )?;
        Ok(inserted > 0)
    }

    pub fn get_watch_daemon(&self, path: &str) -> Result<Option<WatchDaemonRecord>> {
        match self.connection().query_row(
            "SELECT id, path, is_running FROM watch_daemon WHERE path = ?1",
            params![path],
            |row| {
                Ok(WatchDaemonRecord {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    is_running: row.get(2)?,
                })
            },
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_watch_daemons(&self) -> Result<Vec<WatchDaemonRecord>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, path, is_running FROM watch_daemon ORDER BY id")?;
        let records = stmt
            .query_map([], |row| {
                Ok(WatchDaemonRecord {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    is_running: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn delete_watch_daemon(&self, path: &str) -> Result<bool> {
        let removed = self
            .connection()
            .execute("DELETE FROM watch_daemon WHERE path = ?1", params![path])?;
        Ok(removed > 0)
    }

    pub fn set_watch_daemon_running(&self, path: &str, running: bool) -> Result<()> {
        self.connection().execute(
            "UPDATE watch_daemon SET is_running = ?1 WHERE path = ?2",
            params![running, path],
        )?;
        Ok(())
    }

    pub fn reset_watch_daemons_running(&self) -> Result<usize> {
        self.connection()
            .execute("UPDATE watch_daemon SET is_running = 0 WHERE is_running = 1", [])
    }

    /// Daemon rows whose path no scanner is rooted at any more.
    pub fn delete_orphan_watch_daemons(&self) -> Result<usize> {
        let removed = self.connection().execute(
            "DELETE FROM watch_daemon \
             WHERE NOT EXISTS (SELECT 1 FROM scanner s WHERE s.root_path = watch_daemon.path)",
            [],
        )?;
        debug!("Pruned {} orphan watch daemons", removed);
        Ok(removed)
    }

    // ── Content Records ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub fn insert_content_record(
        &self,
        content_hash: &str,
        path: &str,
        owner: Option<&str>,
        rating: &str,
        source: Option<&str>,
        tags: &[String],
        now: i64,
    ) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO content_record (content_hash, path, owner, rating, source, tags, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![content_hash, path, owner, rating, source, tags.join(" "), now],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn content_record_exists(&self, content_hash: &str) -> Result<bool> {
        self.connection().query_row(
            "SELECT EXISTS (SELECT 1 FROM content_record WHERE content_hash = ?1)",
            params![content_hash],
            |row| row.get(0),
        )
    }

    pub fn get_content_record(&self, content_hash: &str) -> Result<Option<ContentRecordRow>> {
        match self.connection().query_row(
            "SELECT id, content_hash, path, owner, rating, source, tags, created_at \
             FROM content_record WHERE content_hash = ?1",
            params![content_hash],
            content_record_from_row,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn list_content_records(&self) -> Result<Vec<ContentRecordRow>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, content_hash, path, owner, rating, source, tags, created_at \
             FROM content_record ORDER BY id",
        )?;
        let records = stmt
            .query_map([], content_record_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn delete_content_record(&self, content_hash: &str) -> Result<bool> {
        let removed = self.connection().execute(
            "DELETE FROM content_record WHERE content_hash = ?1",
            params![content_hash],
        )?;
        Ok(removed > 0)
    }
}
