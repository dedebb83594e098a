use super::walk;
use crate::cache::StalenessCache;
use crate::config::AppConfig;
use crate::consensus::ConsensusRules;
use crate::error::Error;
use crate::hasher;
use crate::pipeline::Pipeline;
use crate::progress::ProgressReporter;
use crate::provider::{LookupResult, ProviderClient};
use crate::records::RecordDraft;
use crate::storage::models::{Provider, ScannerRecord};
use crate::storage::{now_unix, Database};
use rayon::prelude::*;
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Counts reported in the scanner's final status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Unique content hashes under the root.
    pub files_seen: usize,
    /// Files with no canonical record that are not ignored.
    pub new_files: usize,
    /// Files that needed at least one provider lookup.
    pub searched: usize,
    pub created: usize,
    /// Files skipped because consensus produced no tags.
    pub skipped_empty: usize,
    /// Unreadable files and failed record creations.
    pub errors: usize,
    pub lookup_failures: usize,
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Scanned {} files: {} created, {} new, {} searched, {} errors, {} lookup failures",
            self.files_seen,
            self.created,
            self.new_files,
            self.searched,
            self.errors,
            self.lookup_failures
        )
    }
}

fn lease_secs(config: &AppConfig) -> i64 {
    i64::try_from(config.scan_lease_secs).unwrap_or(i64::MAX)
}

/// How often a running scan refreshes its heartbeat: a quarter of the lease.
fn heartbeat_interval(config: &AppConfig) -> Duration {
    Duration::from_millis(config.scan_lease_secs.saturating_mul(250)).max(Duration::from_millis(50))
}

/// True while the scanner's lock is held and its heartbeat is within the lease.
pub fn holds_live_lease(scanner: &ScannerRecord, config: &AppConfig) -> bool {
    scanner.active && scanner.heartbeat_at.unwrap_or(0) >= now_unix() - lease_secs(config)
}

/// Clear locks left behind by scans whose process died.
pub fn reclaim_stale_locks(db: &Database, config: &AppConfig) -> Result<usize, Error> {
    let reclaimed = db.reclaim_stale_scanner_locks(now_unix(), lease_secs(config))?;
    if reclaimed > 0 {
        warn!("Reclaimed {} scanner locks with expired heartbeats", reclaimed);
    }
    Ok(reclaimed)
}

/// Scan every scanner in turn. Scanners that are already running are skipped.
pub fn scan_all(
    pipeline: &Pipeline,
    db: &Database,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<(String, Result<ScanSummary, Error>)>, Error> {
    let mut results = Vec::new();
    for scanner in db.list_scanners()? {
        match pipeline.scan(db, scanner.id, reporter) {
            Err(Error::AlreadyActive(name)) => {
                info!("Skipping {}: already running", name);
            }
            result => results.push((scanner.name, result)),
        }
    }
    Ok(results)
}

struct Candidate {
    path: PathBuf,
    hash: String,
    /// Indexes into the provider list of providers lacking a fresh entry.
    missing: Vec<usize>,
}

impl Pipeline {
    /// Run one full pass over the scanner's root.
    ///
    /// Fails immediately with `Error::AlreadyActive` if another scan holds the
    /// lock. Any other failure releases the lock and leaves the error text as
    /// the scanner's status before being returned.
    pub fn scan(
        &self,
        db: &Database,
        scanner_id: i64,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary, Error> {
        let scanner = db
            .get_scanner(scanner_id)?
            .ok_or_else(|| Error::NotFound(format!("scanner {}", scanner_id)))?;

        let token = Uuid::new_v4().to_string();
        if !db.try_acquire_scanner(
            scanner.id,
            &token,
            now_unix(),
            lease_secs(self.config()),
            "Starting scan",
        )? {
            return Err(Error::AlreadyActive(scanner.name));
        }

        info!("Scanning {} at {}", scanner.name, scanner.root_path);
        let started = Instant::now();
        let run = ScanRun {
            pipeline: self,
            db,
            scanner: &scanner,
            reporter,
            token: &token,
            heartbeat_every: heartbeat_interval(self.config()),
            last_beat: Cell::new(Instant::now()),
        };

        match run.execute() {
            Ok(summary) => {
                if !db.release_scanner(scanner.id, &token, &summary.to_string(), now_unix())? {
                    warn!("{} lost its lease before finishing; status left to the new holder", scanner.name);
                }
                info!(
                    "Scan of {} completed in {:.2}s: {}",
                    scanner.name,
                    started.elapsed().as_secs_f64(),
                    summary
                );
                reporter.on_scan_complete(&scanner.name, &summary);
                Ok(summary)
            }
            Err(err) => {
                let status = err.to_string();
                error!("Scan of {} failed: {}", scanner.name, status);
                match db.release_scanner(scanner.id, &token, &status, now_unix()) {
                    Ok(true) => {}
                    Ok(false) => warn!("{} no longer held its lease", scanner.name),
                    Err(release_err) => {
                        error!("Could not release scanner {}: {}", scanner.name, release_err);
                    }
                }
                reporter.on_scan_failed(&scanner.name, &status);
                Err(err)
            }
        }
    }
}

struct ScanRun<'a> {
    pipeline: &'a Pipeline,
    db: &'a Database,
    scanner: &'a ScannerRecord,
    reporter: &'a dyn ProgressReporter,
    /// Identifies this run's hold on the lease.
    token: &'a str,
    heartbeat_every: Duration,
    last_beat: Cell<Instant>,
}

impl<'a> ScanRun<'a> {
    fn refresh(&self, status: Option<&str>) -> Result<(), Error> {
        if !self
            .db
            .refresh_scanner_lease(self.scanner.id, self.token, status, now_unix())?
        {
            return Err(Error::LeaseLost(self.scanner.name.clone()));
        }
        self.last_beat.set(Instant::now());
        Ok(())
    }

    fn set_status(&self, status: &str) -> Result<(), Error> {
        debug!("[{}] {}", self.scanner.name, status);
        self.refresh(Some(status))?;
        self.reporter.on_status(&self.scanner.name, status);
        Ok(())
    }

    /// Refresh the heartbeat if the interval has passed since the last one.
    fn beat(&self) -> Result<(), Error> {
        if self.last_beat.get().elapsed() >= self.heartbeat_every {
            self.refresh(None)?;
        }
        Ok(())
    }

    /// Run `work` on a helper thread while this thread keeps the lease alive.
    /// The connection stays on this thread. Fails if the lease was lost by the
    /// time `work` finishes.
    fn with_heartbeat<T, F>(&self, work: F) -> Result<T, Error>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            scope.spawn(move || {
                let _ = tx.send(work());
            });
            loop {
                match rx.recv_timeout(self.heartbeat_every) {
                    Ok(value) => {
                        self.refresh(None)?;
                        return Ok(value);
                    }
                    Err(RecvTimeoutError::Timeout) => self.refresh(None)?,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(Error::Other(format!(
                            "scan worker for {} stopped without a result",
                            self.scanner.name
                        )));
                    }
                }
            }
        })
    }

    /// Subscribed providers, or every provider when the scanner names none.
    fn providers(&self) -> Result<Vec<Provider>, Error> {
        let all = self.db.list_providers()?;
        if self.scanner.provider_ids.is_empty() {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|p| self.scanner.provider_ids.contains(&p.id))
            .collect())
    }

    /// A file is worth a record once any provider found it, or once every
    /// provider has answered "not found" and failure tags are configured.
    fn worth_ingesting(
        &self,
        cache: &StalenessCache<'_>,
        hash: &str,
        providers: &[Provider],
        failure_tags: &[String],
    ) -> Result<bool, Error> {
        let entries = cache.entries_for_hash(hash)?;
        if entries.iter().any(|e| e.found) {
            return Ok(true);
        }
        if failure_tags.is_empty() {
            return Ok(false);
        }
        Ok(providers
            .iter()
            .all(|p| entries.iter().any(|e| e.provider_id == p.id)))
    }

    fn execute(&self) -> Result<ScanSummary, Error> {
        let config = self.pipeline.config();
        let records = self.pipeline.records();
        let cache = self.pipeline.cache(self.db);
        let ignore = self.pipeline.ignore_list(self.db);
        let failure_tags = config.effective_failure_tags(&self.scanner.failure_tags);
        let mut summary = ScanSummary::default();

        if self.scanner.auto_prune_results {
            self.set_status("Pruning stale search results")?;
            cache.prune_stale()?;
        }

        let root = Path::new(&self.scanner.root_path);
        if !root.is_dir() {
            return Err(Error::Validation(format!(
                "scanner root '{}' is missing or not a directory",
                root.display()
            )));
        }

        // Phase 1: Walk
        self.set_status(&format!("Walking {}", root.display()))?;
        let paths = self.with_heartbeat(|| walk::collect_files(root, config))?;

        // Phase 2: Hash
        self.set_status(&format!("Hashing {} files", paths.len()))?;
        let reporter = self.reporter;
        let files = self.with_heartbeat(|| hasher::hash_files(&paths, reporter))?;
        let mut hashed = Vec::with_capacity(paths.len());
        for file in files {
            match file.hash {
                Ok(hash) => hashed.push((file.path, hash)),
                Err(_) => summary.errors += 1,
            }
        }
        let unique = hasher::dedupe_by_hash(hashed);
        summary.files_seen = unique.len();

        // Phase 3: Classify
        let providers = self.providers()?;
        let mut to_search: Vec<Candidate> = Vec::new();
        let mut to_ingest: Vec<(PathBuf, String)> = Vec::new();
        for (path, hash) in unique {
            self.beat()?;
            if records.exists_for_hash(&hash)? {
                continue;
            }
            if ignore.should_ignore(&hash, self.scanner)? {
                debug!("Ignoring {} ({})", path.display(), hash);
                continue;
            }
            summary.new_files += 1;

            let mut missing = Vec::new();
            for (idx, provider) in providers.iter().enumerate() {
                if !cache.is_fresh(&hash, provider.id)? {
                    missing.push(idx);
                }
            }

            if !missing.is_empty() {
                to_search.push(Candidate {
                    path,
                    hash,
                    missing,
                });
            } else if self.worth_ingesting(&cache, &hash, &providers, &failure_tags)? {
                to_ingest.push((path, hash));
            } else {
                debug!("No provider knows {}, skipping", path.display());
            }
        }
        summary.searched = to_search.len();

        // Phase 4: Provider lookups
        if !to_search.is_empty() {
            self.set_status(&format!(
                "Searching {} files across {} providers",
                to_search.len(),
                providers.len()
            ))?;
            let clients: Vec<Box<dyn ProviderClient>> = providers
                .iter()
                .map(|p| self.pipeline.connector().connect(p))
                .collect();
            let tasks: Vec<(usize, usize)> = to_search
                .iter()
                .enumerate()
                .flat_map(|(ci, c)| c.missing.iter().map(move |&pi| (ci, pi)))
                .collect();

            let workers = config.lookup_workers;
            let results = self.with_heartbeat(|| {
                run_lookups(workers, reporter, &to_search, &clients, &tasks)
            })??;

            for (&(ci, pi), result) in tasks.iter().zip(results) {
                self.beat()?;
                let candidate = &to_search[ci];
                let provider = &providers[pi];
                match result {
                    Ok(answer) => match cache.put(&candidate.hash, provider.id, &answer) {
                        Ok(_) => {}
                        Err(Error::CacheConflict(hash)) => {
                            debug!("{} was ingested mid-scan, not caching", hash);
                        }
                        Err(e) => return Err(e),
                    },
                    Err(e) => {
                        warn!(
                            "{} lookup of {} failed: {}",
                            provider.name,
                            candidate.path.display(),
                            e
                        );
                        summary.lookup_failures += 1;
                    }
                }
            }

            for candidate in to_search {
                if self.worth_ingesting(&cache, &candidate.hash, &providers, &failure_tags)? {
                    to_ingest.push((candidate.path, candidate.hash));
                }
            }
        }

        // Phase 5: Materialize records
        if !to_ingest.is_empty() {
            self.set_status(&format!("Creating records for {} files", to_ingest.len()))?;
        }
        let rules = ConsensusRules {
            always_tags: &self.scanner.auto_tags,
            failure_tags: &failure_tags,
            ratings: &config.ratings,
            default_rating: &config.default_rating,
        };
        for (path, hash) in to_ingest {
            self.beat()?;
            if records.exists_for_hash(&hash)? {
                continue;
            }
            let consensus = cache.consensus(&hash, &rules)?;
            if consensus.is_empty() {
                debug!("Nothing to say about {}, not ingesting", path.display());
                summary.skipped_empty += 1;
                continue;
            }
            let draft = RecordDraft {
                content_hash: hash,
                rating: consensus.rating,
                source: consensus.source,
                tags: consensus.tags,
            };
            match records.create_from_file(&path, self.scanner.owner.as_deref(), &draft) {
                Ok(record) => {
                    summary.created += 1;
                    self.pipeline.notify_created(&record);
                }
                Err(e) => {
                    warn!("Could not ingest {}: {}", path.display(), e);
                    summary.errors += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// Fan out one lookup per (file, provider) pair on a bounded pool. Results
/// come back in task order; cache writes happen afterwards on the scan thread.
fn run_lookups(
    workers: usize,
    reporter: &dyn ProgressReporter,
    candidates: &[Candidate],
    clients: &[Box<dyn ProviderClient>],
    tasks: &[(usize, usize)],
) -> Result<Vec<Result<LookupResult, Error>>, Error> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| Error::Other(format!("Failed to build lookup pool: {}", e)))?;

    let total = tasks.len();
    let done = AtomicUsize::new(0);
    Ok(pool.install(|| {
        tasks
            .par_iter()
            .map(|&(ci, pi)| {
                let result = clients[pi].lookup(&candidates[ci].hash);
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.on_lookup_progress(finished, total);
                result
            })
            .collect()
    }))
}
