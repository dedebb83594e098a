use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "booru-scanner")]
#[command(about = "Watch media folders and ingest files tagged by booru providers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one scan of the named scanner
    Scan { name: String },
    /// Scan every scanner that is not already running
    ScanAll,
    /// Watch every scanner root and rescan on file changes
    Watch,
    /// Manage scanners
    #[command(subcommand)]
    Scanner(ScannerCommand),
    /// Manage metadata providers
    #[command(subcommand)]
    Provider(ProviderCommand),
    /// Manage the ignore list
    #[command(subcommand)]
    Ignore(IgnoreCommand),
    /// Manage cached provider answers
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Manage ingested records
    #[command(subcommand)]
    Record(RecordCommand),
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScannerAddArgs {
    pub name: String,
    pub path: PathBuf,
    #[arg(long)]
    pub owner: Option<String>,
    /// Tag added to every record this scanner creates
    #[arg(long = "auto-tag")]
    pub auto_tags: Vec<String>,
    /// Tag applied when no provider knows a file
    #[arg(long = "failure-tag")]
    pub failure_tags: Vec<String>,
    /// Provider id to search; repeat for several, omit for all
    #[arg(long = "provider")]
    pub provider_ids: Vec<i64>,
    /// Drop stale cached answers at the start of every scan
    #[arg(long)]
    pub auto_prune: bool,
}

#[derive(Debug, Subcommand)]
pub enum ScannerCommand {
    Add(ScannerAddArgs),
    List,
    Remove { name: String },
    /// Point a scanner at a different directory
    Move { name: String, path: PathBuf },
    /// Clear a scanner's lock left behind by a crashed scan
    Unlock { name: String },
    /// Let a scanner ingest an ignored hash
    Exempt { name: String, hash: String },
}

#[derive(Debug, Subcommand)]
pub enum ProviderCommand {
    Add { name: String, url: String },
    List,
    Remove { id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum IgnoreCommand {
    List,
    Add {
        hash: String,
        #[arg(long, default_value = "manually ignored")]
        reason: String,
    },
    Remove { hash: String },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Delete cached answers older than the staleness threshold
    Prune,
}

#[derive(Debug, Subcommand)]
pub enum RecordCommand {
    List,
    /// Delete a record and ignore its content from now on
    Delete {
        hash: String,
        #[arg(long, default_value = "record deleted")]
        reason: String,
    },
}
