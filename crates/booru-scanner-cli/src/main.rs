mod commands;
mod logging;
mod progress;

use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use booru_scanner_core::provider::{register_provider, HttpConnector, ProviderConnector};
use booru_scanner_core::records::LocalRecordStore;
use booru_scanner_core::scanner::{self, ScannerSpec};
use booru_scanner_core::storage::models::ScannerRecord;
use booru_scanner_core::storage::{now_unix, Database};
use booru_scanner_core::watch::{self, WatchSupervisor};
use booru_scanner_core::{AppConfig, IgnoreList, Pipeline, ProgressReporter};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{
    CacheCommand, Cli, Commands, IgnoreCommand, ProviderCommand, RecordCommand, ScannerCommand,
};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match booru_scanner_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        Some(command) => run(command, config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

/// Shared handles every command works through.
struct App {
    config: AppConfig,
    db: Database,
    records: Arc<LocalRecordStore>,
    connector: Arc<HttpConnector>,
}

impl App {
    fn open(config: AppConfig) -> Result<Self> {
        let db = Database::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path))?;
        let records = Arc::new(LocalRecordStore::open(&config.db_path)?);
        let connector = Arc::new(HttpConnector::new(config.provider_timeout()));
        Ok(Self {
            config,
            db,
            records,
            connector,
        })
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.config.clone(), self.records.clone(), self.connector.clone())
    }

    fn scanner(&self, name: &str) -> Result<ScannerRecord> {
        self.db
            .get_scanner_by_name(name)?
            .ok_or_else(|| anyhow!("no scanner named '{}'", name))
    }
}

fn run(command: Commands, config: AppConfig) -> Result<()> {
    let app = App::open(config)?;

    match command {
        Commands::Scan { name } => {
            let scanner = app.scanner(&name)?;
            scanner::reclaim_stale_locks(&app.db, &app.config)?;
            let reporter = CliReporter::new();
            let summary = app.pipeline().scan(&app.db, scanner.id, &reporter)?;
            info!("{}: {}", scanner.name.cyan(), summary);
        }
        Commands::ScanAll => {
            scanner::reclaim_stale_locks(&app.db, &app.config)?;
            let reporter = CliReporter::new();
            for (name, result) in scanner::scan_all(&app.pipeline(), &app.db, &reporter)? {
                match result {
                    Ok(summary) => info!("{}: {}", name.cyan(), summary),
                    Err(err) => warn!("{}: {}", name.cyan(), format!("{}", err).red()),
                }
            }
        }
        Commands::Watch => run_watch(&app)?,
        Commands::Scanner(cmd) => run_scanner(&app, cmd)?,
        Commands::Provider(cmd) => run_provider(&app, cmd)?,
        Commands::Ignore(cmd) => run_ignore(&app, cmd)?,
        Commands::Cache(CacheCommand::Prune) => {
            let removed = app.pipeline().cache(&app.db).prune_stale()?;
            info!("Pruned {} stale cache entries", format!("{}", removed).green());
        }
        Commands::Record(cmd) => run_record(&app, cmd)?,
        Commands::PrintConfig => println!("Configuration: {:#?}", app.config),
    }

    Ok(())
}

fn run_watch(app: &App) -> Result<()> {
    scanner::reclaim_stale_locks(&app.db, &app.config)?;
    let reporter: Arc<dyn ProgressReporter> = Arc::new(CliReporter::new());
    let supervisor = WatchSupervisor::new(&app.config.db_path, app.pipeline(), reporter)
        .with_context(|| format!("opening database {}", app.config.db_path))?;

    match app.config.scan_all_interval() {
        Some(every) => info!(
            "Re-registering every {}s, scanning everything every {}s",
            app.config.watch_register_interval_secs,
            every.as_secs()
        ),
        None => info!(
            "Re-registering every {}s",
            app.config.watch_register_interval_secs
        ),
    }
    let stop = AtomicBool::new(false);
    supervisor.run(&stop)?;
    Ok(())
}

fn run_scanner(app: &App, cmd: ScannerCommand) -> Result<()> {
    match cmd {
        ScannerCommand::Add(args) => {
            let spec = ScannerSpec {
                name: args.name,
                root_path: args.path,
                owner: args.owner,
                auto_tags: args.auto_tags,
                failure_tags: args.failure_tags,
                provider_ids: args.provider_ids,
                auto_prune_results: args.auto_prune,
            };
            let created = scanner::create_scanner(&app.db, &spec)?;
            watch::from_scanner(&app.db, &created)?;
            println!("Created scanner {} at {}", created.name.green(), created.root_path);
        }
        ScannerCommand::List => {
            for s in app.db.list_scanners()? {
                let state = if s.active { "running".yellow() } else { "idle".dimmed() };
                println!("{:>4}  {}  {}  [{}]", s.id, s.name.cyan(), s.root_path, state);
                println!("      {}", s.status);
            }
        }
        ScannerCommand::Remove { name } => {
            let s = app.scanner(&name)?;
            scanner::delete_scanner(&app.db, s.id)?;
            let pruned = watch::prune(&app.db)?;
            println!("Removed scanner {} ({} watch daemons pruned)", name.red(), pruned);
        }
        ScannerCommand::Move { name, path } => {
            let s = app.scanner(&name)?;
            let moved = scanner::update_scanner_root(&app.db, s.id, &path)?;
            watch::prune(&app.db)?;
            watch::from_scanner(&app.db, &moved)?;
            println!("Scanner {} now at {}", moved.name.green(), moved.root_path);
        }
        ScannerCommand::Unlock { name } => {
            let s = app.scanner(&name)?;
            app.db.set_scanner_active(s.id, false, now_unix())?;
            println!("Unlocked scanner {}", name.green());
        }
        ScannerCommand::Exempt { name, hash } => {
            let s = app.scanner(&name)?;
            IgnoreList::new(&app.db).exempt(s.id, &hash)?;
            println!("Scanner {} may now ingest {}", name.green(), hash);
        }
    }
    Ok(())
}

fn run_provider(app: &App, cmd: ProviderCommand) -> Result<()> {
    match cmd {
        ProviderCommand::Add { name, url } => {
            let connector: &dyn ProviderConnector = app.connector.as_ref();
            let provider = register_provider(&app.db, connector, &name, &url)?;
            println!("Registered provider {} ({})", provider.name.green(), provider.id);
        }
        ProviderCommand::List => {
            for p in app.db.list_providers()? {
                println!("{:>4}  {}  {}", p.id, p.name.cyan(), p.base_url);
            }
        }
        ProviderCommand::Remove { id } => {
            if !app.db.delete_provider(id)? {
                return Err(anyhow!("no provider with id {}", id));
            }
            println!("Removed provider {}", id);
        }
    }
    Ok(())
}

fn run_ignore(app: &App, cmd: IgnoreCommand) -> Result<()> {
    let ignore = IgnoreList::new(&app.db);
    match cmd {
        IgnoreCommand::List => {
            for entry in ignore.list()? {
                println!("{}  {}", entry.content_hash.yellow(), entry.reason);
            }
        }
        IgnoreCommand::Add { hash, reason } => {
            if !ignore.record_deletion(&hash, &reason)? {
                println!("{} was already ignored", hash);
            }
        }
        IgnoreCommand::Remove { hash } => {
            if !ignore.remove(&hash)? {
                return Err(anyhow!("{} is not ignored", hash));
            }
        }
    }
    Ok(())
}

fn run_record(app: &App, cmd: RecordCommand) -> Result<()> {
    match cmd {
        RecordCommand::List => {
            for record in app.records.list()? {
                println!(
                    "{}  {}  {}  {}",
                    record.content_hash.cyan(),
                    record.rating,
                    record.path,
                    record.tags.join(" ").dimmed()
                );
            }
        }
        RecordCommand::Delete { hash, reason } => {
            let ignore = IgnoreList::new(&app.db);
            if !app.records.delete(&hash, &reason, &ignore)? {
                return Err(anyhow!("no record for {}", hash));
            }
            println!("Deleted record {}; its content is now ignored", hash.red());
        }
    }
    Ok(())
}
