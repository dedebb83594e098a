use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    /// Lowercase extensions, without the dot.
    pub accepted_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub staleness_threshold_secs: u64,
    pub use_failure_tags: bool,
    /// Applied when no provider knows a file and the scanner has none of its own.
    pub failure_tags: Vec<String>,
    pub ratings: Vec<String>,
    pub default_rating: String,
    pub watch_poll_interval_secs: u64,
    /// How often `watch` re-registers scanners and restarts missing daemons.
    pub watch_register_interval_secs: u64,
    /// Period of the full `scan_all` pass while watching. 0 turns it off.
    pub scan_all_interval_secs: u64,
    pub provider_timeout_secs: u64,
    pub lookup_workers: usize,
    pub scan_lease_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "booru_scanner.db".to_string(),
            accepted_extensions: ["jpg", "jpeg", "png", "gif", "webm", "mp4", "webp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_patterns: Vec::new(),
            staleness_threshold_secs: 30 * 24 * 60 * 60,
            use_failure_tags: true,
            failure_tags: vec!["tagme".to_string()],
            ratings: vec![
                "safe".to_string(),
                "questionable".to_string(),
                "explicit".to_string(),
            ],
            default_rating: "safe".to_string(),
            watch_poll_interval_secs: 5,
            watch_register_interval_secs: 30,
            scan_all_interval_secs: 5 * 60,
            provider_timeout_secs: 15,
            lookup_workers: 8,
            scan_lease_secs: 60 * 60,
        }
    }
}

/// Loads `Config.toml` (optional) overlaid with `BOORU_SCANNER_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("BOORU_SCANNER")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("accepted_extensions")
                .with_list_parse_key("ignore_patterns")
                .with_list_parse_key("failure_tags")
                .with_list_parse_key("ratings"),
        )
        .build()?;
    let config = builder.try_deserialize::<AppConfig>()?;
    config.validate()?;
    Ok(config)
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accepted_extensions.is_empty() {
            return Err(ConfigError::Message(
                "accepted_extensions must not be empty".to_string(),
            ));
        }
        if self.watch_poll_interval_secs == 0 {
            return Err(ConfigError::Message(
                "watch_poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.watch_register_interval_secs == 0 {
            return Err(ConfigError::Message(
                "watch_register_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.scan_lease_secs == 0 {
            return Err(ConfigError::Message(
                "scan_lease_secs must be greater than zero".to_string(),
            ));
        }
        if self.lookup_workers == 0 {
            return Err(ConfigError::Message(
                "lookup_workers must be greater than zero".to_string(),
            ));
        }
        if !self.ratings.iter().any(|r| r == &self.default_rating) {
            return Err(ConfigError::Message(format!(
                "default_rating '{}' is not one of {:?}",
                self.default_rating, self.ratings
            )));
        }
        Ok(())
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_threshold_secs)
    }

    pub fn watch_poll_interval(&self) -> Duration {
        Duration::from_secs(self.watch_poll_interval_secs)
    }

    pub fn watch_register_interval(&self) -> Duration {
        Duration::from_secs(self.watch_register_interval_secs)
    }

    pub fn scan_all_interval(&self) -> Option<Duration> {
        match self.scan_all_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn is_accepted(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.accepted_extensions.iter().any(|a| a == &ext)
            })
            .unwrap_or(false)
    }

    /// Failure tags in effect for a scanner: its own set, else the global one.
    pub fn effective_failure_tags(&self, scanner_tags: &[String]) -> Vec<String> {
        if !self.use_failure_tags {
            return Vec::new();
        }
        if scanner_tags.is_empty() {
            self.failure_tags.clone()
        } else {
            scanner_tags.to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_rating_outside_vocabulary_is_rejected() {
        let config = AppConfig {
            default_rating: "general".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let config = AppConfig {
            watch_poll_interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_scan_all_interval_disables_it() {
        let config = AppConfig {
            scan_all_interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.scan_all_interval(), None);
        assert_eq!(
            AppConfig::default().scan_all_interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_zero_register_interval_is_rejected() {
        let config = AppConfig {
            watch_register_interval_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_accepted_ignores_case() {
        let config = AppConfig::default();
        assert!(config.is_accepted(Path::new("/media/a.PNG")));
        assert!(config.is_accepted(Path::new("clip.webm")));
        assert!(!config.is_accepted(Path::new("notes.txt")));
        assert!(!config.is_accepted(Path::new("no_extension")));
    }

    #[test]
    fn test_effective_failure_tags() {
        let mut config = AppConfig::default();
        assert_eq!(config.effective_failure_tags(&[]), vec!["tagme".to_string()]);
        assert_eq!(
            config.effective_failure_tags(&["unsorted".to_string()]),
            vec!["unsorted".to_string()]
        );
        config.use_failure_tags = false;
        assert!(config.effective_failure_tags(&["unsorted".to_string()]).is_empty());
    }
}
