pub mod booru;

use crate::error::Error;
use crate::storage::models::Provider;
use crate::storage::Database;
use std::time::Duration;
use tracing::{info, warn};

pub use booru::BooruClient;

/// One provider's answer for one content hash. "Not found" is a valid answer,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LookupResult {
    pub found: bool,
    /// Space-delimited raw tag string.
    pub tags: String,
    pub rating: String,
    pub source: Option<String>,
}

impl LookupResult {
    pub fn not_found() -> Self {
        Self::default()
    }
}

pub trait ProviderClient: Send + Sync {
    /// `Error::Transport` on unreachable endpoints, timeouts, or malformed responses.
    fn lookup(&self, content_hash: &str) -> Result<LookupResult, Error>;

    /// Base endpoint, query endpoint, well-formed response, non-empty baseline query.
    fn is_reachable(&self) -> bool;
}

/// Builds a client for a persisted provider.
pub trait ProviderConnector: Send + Sync {
    fn connect(&self, provider: &Provider) -> Box<dyn ProviderClient>;

    /// Client for a provider that is not persisted yet.
    fn connect_url(&self, base_url: &str) -> Box<dyn ProviderClient> {
        self.connect(&Provider {
            id: 0,
            name: String::new(),
            base_url: base_url.to_string(),
        })
    }
}

/// Connects to booru-style DAPI endpoints over HTTP.
pub struct HttpConnector {
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProviderConnector for HttpConnector {
    fn connect(&self, provider: &Provider) -> Box<dyn ProviderClient> {
        Box::new(BooruClient::new(&provider.base_url, self.timeout))
    }
}

/// Validate and persist a provider. Nothing is written unless the endpoint
/// passes the liveness test.
pub fn register_provider(
    db: &Database,
    connector: &dyn ProviderConnector,
    name: &str,
    base_url: &str,
) -> Result<Provider, Error> {
    let name = name.trim();
    let base_url = base_url.trim().trim_end_matches('/');
    if name.is_empty() {
        return Err(Error::Validation("provider name must not be empty".to_string()));
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(Error::Validation(format!(
            "provider URL '{}' must be http(s)",
            base_url
        )));
    }

    if !connector.connect_url(base_url).is_reachable() {
        warn!("Provider {} at {} failed the liveness test", name, base_url);
        return Err(Error::Validation(format!(
            "provider at '{}' is unreachable or returned an invalid response",
            base_url
        )));
    }

    let id = db.insert_provider(name, base_url)?;
    info!("Registered provider {} ({})", name, base_url);
    Ok(Provider {
        id,
        name: name.to_string(),
        base_url: base_url.to_string(),
    })
}
