use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Scanner or provider rejected at save time; nothing was persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Scanner '{0}' is already running")]
    AlreadyActive(String),

    /// The scan's lease was reclaimed or unlocked while it was still running.
    #[error("Scanner '{0}' lost its scan lease")]
    LeaseLost(String),

    #[error("Provider transport error: {0}")]
    Transport(String),

    /// A cache write was refused because the content is already ingested.
    #[error("Content {0} already has a canonical record")]
    CacheConflict(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}
