//! Booru DAPI client (Gelbooru/Safebooru style `index.php?page=dapi`).

use super::{LookupResult, ProviderClient};
use crate::error::Error;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Provider client backed by `ureq`. Every call is bounded by the agent timeouts.
pub struct BooruClient {
    base_url: String,
    http_client: ureq::Agent,
}

impl BooruClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5).min(timeout))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            http_client,
        }
    }

    /// The post-index endpoint. Subject to pagination; the first page is enough.
    pub fn api_url(&self) -> String {
        format!("{}/index.php?page=dapi&s=post&q=index&json=1", self.base_url)
    }

    fn get_text(&self, url: &str) -> Result<String, Error> {
        let response = self.http_client.get(url).call().map_err(|err| match err {
            ureq::Error::Status(code, _) => {
                Error::Transport(format!("{} returned status {}", url, code))
            }
            ureq::Error::Transport(transport) => {
                Error::Transport(format!("{} unreachable: {}", url, transport))
            }
        })?;
        response
            .into_string()
            .map_err(|err| Error::Transport(format!("{} body read failed: {}", url, err)))
    }

    /// Raw post list for a search phrase.
    pub fn search(&self, phrase: &str) -> Result<Vec<Value>, Error> {
        let url = format!("{}&tags={}", self.api_url(), urlencoding::encode(phrase));
        let body = self.get_text(&url)?;
        parse_posts(&body)
    }
}

impl ProviderClient for BooruClient {
    fn lookup(&self, content_hash: &str) -> Result<LookupResult, Error> {
        let posts = self.search(&format!("md5:{}", content_hash))?;
        let result = lookup_from_posts(&posts);
        debug!(
            "{} lookup {} -> found: {}",
            self.base_url, content_hash, result.found
        );
        Ok(result)
    }

    fn is_reachable(&self) -> bool {
        if self.get_text(&self.base_url).is_err() {
            return false;
        }
        match self.get_text(&self.api_url()).and_then(|body| parse_posts(&body)) {
            Ok(posts) => !posts.is_empty(),
            Err(err) => {
                debug!("{} failed liveness: {}", self.base_url, err);
                false
            }
        }
    }
}

/// DAPI bodies come as a bare list, as `{"post": [...]}`, or empty for no hits.
pub fn parse_posts(body: &str) -> Result<Vec<Value>, Error> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|err| Error::Transport(format!("malformed provider response: {}", err)))?;
    Ok(match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("post") {
            Some(Value::Array(items)) => items,
            Some(item @ Value::Object(_)) => vec![item],
            _ => Vec::new(),
        },
        _ => {
            return Err(Error::Transport(
                "provider response is neither a list nor an object".to_string(),
            ))
        }
    })
}

/// The first post carrying a tag string wins.
pub fn lookup_from_posts(posts: &[Value]) -> LookupResult {
    let Some(post) = posts
        .iter()
        .find(|post| post.get("tags").and_then(Value::as_str).is_some())
    else {
        return LookupResult::not_found();
    };

    let text = |key: &str| post.get(key).and_then(Value::as_str).map(str::to_string);
    LookupResult {
        found: true,
        tags: text("tags").unwrap_or_default(),
        rating: text("rating").unwrap_or_default(),
        source: text("source").filter(|s| !s.trim().is_empty()),
    }
}
