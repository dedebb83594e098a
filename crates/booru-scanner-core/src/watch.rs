//! One long-lived watch loop per distinct scanner root.
//!
//! A daemon owns its own `Database` connection and receives filesystem events
//! over a channel fed by a notify watcher. `tick` does one round of work
//! (exit checks, then drain events and maybe scan) so tests can drive the
//! loop without real sleeping; `run` and `spawn` wrap it in a thread.
//! `WatchSupervisor` keeps the set of daemon threads in line with the
//! registered scanners for as long as `watch` runs.

use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::progress::ProgressReporter;
use crate::scanner::{holds_live_lease, reclaim_stale_locks, scan_all, ScanSummary};
use crate::storage::models::ScannerRecord;
use crate::storage::Database;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(path) | WatchEvent::Modified(path) => path,
        }
    }

    /// Keep creations and content modifications. Removals and the "from" half
    /// of a rename never trigger a scan.
    pub fn from_notify(event: Event) -> Vec<WatchEvent> {
        match event.kind {
            EventKind::Create(_) => event.paths.into_iter().map(WatchEvent::Created).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
            EventKind::Modify(ModifyKind::Name(_)) => {
                event.paths.into_iter().map(WatchEvent::Created).collect()
            }
            EventKind::Modify(_) => event.paths.into_iter().map(WatchEvent::Modified).collect(),
            _ => Vec::new(),
        }
    }
}

/// Make sure a daemon record exists for the scanner's root. Returns false if
/// one already did.
pub fn from_scanner(db: &Database, scanner: &ScannerRecord) -> Result<bool, Error> {
    let created = db.insert_watch_daemon_if_absent(&scanner.root_path)?;
    if created {
        info!("Registered watch daemon for {}", scanner.root_path);
    }
    Ok(created)
}

/// Remove daemon records whose path no scanner is rooted at.
pub fn prune(db: &Database) -> Result<usize, Error> {
    Ok(db.delete_orphan_watch_daemons()?)
}

/// Why a daemon loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    RecordDeleted,
    NoScanner,
    PathChanged,
    Stopped,
    WatcherClosed,
}

/// Outcome of one `tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    Idle,
    /// Events arrived while the owning scanner held its lock.
    Busy,
    Scanned(ScanSummary),
    ScanFailed(String),
    Exit(DaemonExit),
}

pub struct WatchDaemon {
    db: Database,
    pipeline: Pipeline,
    path: String,
    owner_id: Option<i64>,
    events: Receiver<WatchEvent>,
    pending: Vec<WatchEvent>,
}

impl WatchDaemon {
    /// The owning scanner is whichever scanner is rooted at `path` right now.
    pub fn new(
        db: Database,
        pipeline: Pipeline,
        path: &str,
        events: Receiver<WatchEvent>,
    ) -> Result<Self, Error> {
        let owner_id = db.find_scanner_by_root(path)?.map(|s| s.id);
        Ok(Self {
            db,
            pipeline,
            path: path.to_string(),
            owner_id,
            events,
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn exit_condition(&self) -> Result<Option<DaemonExit>, Error> {
        if self.db.get_watch_daemon(&self.path)?.is_none() {
            return Ok(Some(DaemonExit::RecordDeleted));
        }
        if let Some(owner_id) = self.owner_id {
            if let Some(owner) = self.db.get_scanner(owner_id)? {
                if owner.root_path != self.path {
                    return Ok(Some(DaemonExit::PathChanged));
                }
            }
        }
        if self.db.find_scanner_by_root(&self.path)?.is_none() {
            return Ok(Some(DaemonExit::NoScanner));
        }
        Ok(None)
    }

    /// One round: check exit conditions, drain queued events, and scan if any
    /// of them touched a non-directory path.
    pub fn tick(&mut self, reporter: &dyn ProgressReporter) -> Result<Tick, Error> {
        if let Some(exit) = self.exit_condition()? {
            return Ok(Tick::Exit(exit));
        }

        let mut closed = false;
        loop {
            match self.events.try_recv() {
                Ok(event) => self.pending.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        let triggered = self.pending.drain(..).filter(|e| !e.path().is_dir()).count();
        let tick = if triggered == 0 {
            Tick::Idle
        } else {
            debug!("{} file events under {}", triggered, self.path);
            self.trigger_scan(reporter)?
        };

        if closed && tick == Tick::Idle {
            return Ok(Tick::Exit(DaemonExit::WatcherClosed));
        }
        Ok(tick)
    }

    fn trigger_scan(&self, reporter: &dyn ProgressReporter) -> Result<Tick, Error> {
        let owner = match self.db.find_scanner_by_root(&self.path)? {
            Some(owner) => owner,
            None => return Ok(Tick::Exit(DaemonExit::NoScanner)),
        };
        if holds_live_lease(&owner, self.pipeline.config()) {
            debug!("Scanner {} is busy, dropping events", owner.name);
            return Ok(Tick::Busy);
        }
        match self.pipeline.scan(&self.db, owner.id, reporter) {
            Ok(summary) => Ok(Tick::Scanned(summary)),
            Err(Error::AlreadyActive(_)) => Ok(Tick::Busy),
            Err(e) => Ok(Tick::ScanFailed(e.to_string())),
        }
    }

    /// Block until an exit condition holds or `stop` is raised. The record is
    /// deleted on every exit except an explicit stop, which only clears the
    /// running flag.
    pub fn run(
        mut self,
        stop: &AtomicBool,
        poll: Duration,
        reporter: &dyn ProgressReporter,
    ) -> Result<DaemonExit, Error> {
        self.db.set_watch_daemon_running(&self.path, true)?;
        info!("Watching {}", self.path);

        let exit = loop {
            if stop.load(Ordering::SeqCst) {
                break DaemonExit::Stopped;
            }
            match self.tick(reporter) {
                Ok(Tick::Exit(exit)) => break exit,
                Ok(Tick::ScanFailed(message)) => warn!("Scan of {} failed: {}", self.path, message),
                Ok(_) => {}
                Err(e) => {
                    error!("Watch loop for {} failed: {}", self.path, e);
                    if let Err(clear_err) = self.db.set_watch_daemon_running(&self.path, false) {
                        warn!("Could not clear running flag for {}: {}", self.path, clear_err);
                    }
                    return Err(e);
                }
            }
            match self.events.recv_timeout(poll) {
                Ok(event) => self.pending.push(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if self.pending.is_empty() {
                        break DaemonExit::WatcherClosed;
                    }
                }
            }
        };

        if exit == DaemonExit::Stopped {
            self.db.set_watch_daemon_running(&self.path, false)?;
        } else {
            self.db.delete_watch_daemon(&self.path)?;
        }
        info!("Stopped watching {} ({:?})", self.path, exit);
        Ok(exit)
    }
}

/// A daemon running on its own thread.
pub struct WatchHandle {
    path: String,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<DaemonExit, Error>>,
}

impl WatchHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ask the loop to exit; it notices within one poll interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> Result<DaemonExit, Error> {
        self.thread
            .join()
            .map_err(|_| Error::Other(format!("watch thread for {} panicked", self.path)))?
    }
}

/// Start a notify watcher on `path` and a daemon thread consuming its events.
pub fn spawn(
    db_path: &str,
    pipeline: Pipeline,
    path: &str,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<WatchHandle, Error> {
    let db = Database::open(db_path)?;
    let (tx, rx) = mpsc::channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for mapped in WatchEvent::from_notify(event) {
                let _ = tx.send(mapped);
            }
        }
        Err(err) => warn!("Watcher error: {}", err),
    })?;
    watcher.watch(Path::new(path), RecursiveMode::Recursive)?;

    let poll = pipeline.config().watch_poll_interval();
    let daemon = WatchDaemon::new(db, pipeline, path, rx)?;
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);

    let thread = thread::Builder::new()
        .name(format!("watch:{}", path))
        .spawn(move || {
            let _watcher = watcher;
            daemon.run(&thread_stop, poll, reporter.as_ref())
        })?;

    Ok(WatchHandle {
        path: path.to_string(),
        stop,
        thread,
    })
}

/// Owns the daemon threads of one `watch` process.
///
/// Each registration pass prunes orphan records, registers every scanner,
/// reaps finished daemons and starts one for every record without a live
/// thread. `run` repeats the pass on the register interval and, when one is
/// configured, runs `scan_all` on the scan-all interval.
pub struct WatchSupervisor {
    db: Database,
    db_path: String,
    pipeline: Pipeline,
    reporter: Arc<dyn ProgressReporter>,
    handles: Vec<WatchHandle>,
}

impl WatchSupervisor {
    /// Running flags left by a previous process are cleared here.
    pub fn new(
        db_path: &str,
        pipeline: Pipeline,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self, Error> {
        let db = Database::open(db_path)?;
        let reset = db.reset_watch_daemons_running()?;
        if reset > 0 {
            warn!("Cleared {} running flags left by a previous watch", reset);
        }
        Ok(Self {
            db,
            db_path: db_path.to_string(),
            pipeline,
            reporter,
            handles: Vec::new(),
        })
    }

    /// Paths whose daemon thread is still alive.
    pub fn watched(&self) -> Vec<&str> {
        self.handles
            .iter()
            .filter(|h| !h.is_finished())
            .map(|h| h.path())
            .collect()
    }

    fn reap(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.handles.drain(..).partition(|h| h.is_finished());
        self.handles = running;
        for handle in finished {
            log_exit(handle);
        }
    }

    /// One registration pass. Returns how many daemons it started.
    pub fn register_all(&mut self) -> Result<usize, Error> {
        prune(&self.db)?;
        for scanner in self.db.list_scanners()? {
            from_scanner(&self.db, &scanner)?;
        }
        self.reap();

        let mut started = 0;
        for record in self.db.list_watch_daemons()? {
            if record.is_running || self.handles.iter().any(|h| h.path() == record.path) {
                continue;
            }
            match spawn(
                &self.db_path,
                self.pipeline.clone(),
                &record.path,
                Arc::clone(&self.reporter),
            ) {
                Ok(handle) => {
                    self.handles.push(handle);
                    started += 1;
                }
                Err(err) => warn!("Could not watch {}: {}", record.path, err),
            }
        }
        if started > 0 {
            info!("Started {} watch daemons", started);
        }
        Ok(started)
    }

    /// Scan every idle scanner once.
    pub fn run_scheduled_scans(&self) -> Result<(), Error> {
        reclaim_stale_locks(&self.db, self.pipeline.config())?;
        for (name, result) in scan_all(&self.pipeline, &self.db, self.reporter.as_ref())? {
            match result {
                Ok(summary) => info!("Scheduled scan of {}: {}", name, summary),
                Err(err) => warn!("Scheduled scan of {} failed: {}", name, err),
            }
        }
        Ok(())
    }

    /// Supervise until `stop` is raised, then stop and join every daemon.
    pub fn run(mut self, stop: &AtomicBool) -> Result<(), Error> {
        let poll = self.pipeline.config().watch_poll_interval();
        let register_every = self.pipeline.config().watch_register_interval();
        let scan_every = self.pipeline.config().scan_all_interval();

        self.register_all()?;
        let mut last_register = Instant::now();
        let mut last_scan = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            thread::sleep(poll);
            if last_register.elapsed() >= register_every {
                last_register = Instant::now();
                if let Err(err) = self.register_all() {
                    error!("Watch registration pass failed: {}", err);
                }
            }
            if let Some(every) = scan_every {
                if last_scan.elapsed() >= every {
                    last_scan = Instant::now();
                    if let Err(err) = self.run_scheduled_scans() {
                        error!("Scheduled scan pass failed: {}", err);
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.stop();
        }
        for handle in self.handles {
            log_exit(handle);
        }
    }
}

fn log_exit(handle: WatchHandle) {
    let path = handle.path().to_string();
    match handle.join() {
        Ok(exit) => info!("Watch on {} ended: {:?}", path, exit),
        Err(err) => error!("Watch on {} failed: {}", path, err),
    }
}
