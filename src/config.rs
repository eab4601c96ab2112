//! Configuration module for the reload engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `HOTROUTE_` and use double
//! underscores to separate nested levels:
//! - `HOTROUTE_DEBOUNCE_MS=20` sets `debounce_ms`
//! - `HOTROUTE_RECURSIVE=true` sets `recursive`
//! - `HOTROUTE_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::watcher::{WatchBackend, WatchedFolder};

/// Errors from loading or validating settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which change-detection backend the watcher uses.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native notifications, falling back to polling when unavailable.
    #[default]
    Auto,
    Native,
    Polling,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReloadSettings {
    /// Folder holding the route definition files
    #[serde(default)]
    pub folder: PathBuf,

    /// Quiet period before a changed file is reloaded
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Watch subdirectories too
    #[serde(default)]
    pub recursive: bool,

    /// File extensions to react to (empty means all files)
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Change-detection backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Scan interval for the polling backend and the folder health check
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// First delay before re-establishing a lost watch
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    /// Upper bound for the re-watch backoff
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Reload files already present when watching starts
    #[serde(default)]
    pub load_existing: bool,

    /// Skip reloads whose content is identical to the last applied one
    #[serde(default = "default_true")]
    pub skip_unchanged: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging levels, applied by [`crate::logging::init_with_config`].
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `hotroute::watcher = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_debounce_ms() -> u64 {
    500
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_retry_initial_ms() -> u64 {
    500
}
fn default_retry_max_ms() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self {
            folder: PathBuf::new(),
            debounce_ms: default_debounce_ms(),
            recursive: false,
            extensions: Vec::new(),
            backend: BackendKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
            load_existing: false,
            skip_unchanged: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl ReloadSettings {
    /// Default settings watching the given folder.
    pub fn for_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            ..Self::default()
        }
    }

    /// Load settings from a TOML file layered over defaults and `HOTROUTE_` env vars.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HOTROUTE_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
            .extract()
            .map_err(Box::new)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "folder",
                reason: "a folder to watch is required".to_string(),
            });
        }
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "debounce_ms",
                reason: "must be a positive duration".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be a positive duration".to_string(),
            });
        }
        if self.retry_initial_ms == 0 || self.retry_max_ms < self.retry_initial_ms {
            return Err(ConfigError::Invalid {
                field: "retry_max_ms",
                reason: format!(
                    "backoff bounds must satisfy 0 < {} <= {}",
                    self.retry_initial_ms, self.retry_max_ms
                ),
            });
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    /// The watched folder described by these settings.
    pub fn watched_folder(&self) -> WatchedFolder {
        WatchedFolder::new(self.folder.clone())
            .recursive(self.recursive)
            .extensions(self.extensions.iter().cloned())
    }

    /// The change-detection backend described by these settings.
    pub fn watch_backend(&self) -> WatchBackend {
        match self.backend {
            BackendKind::Auto => WatchBackend::Auto {
                poll_interval: self.poll_interval(),
            },
            BackendKind::Native => WatchBackend::Native,
            BackendKind::Polling => WatchBackend::Polling {
                interval: self.poll_interval(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = ReloadSettings::for_folder("/tmp/routes");
        assert_eq!(settings.debounce(), Duration::from_millis(500));
        assert!(!settings.recursive);
        assert!(settings.extensions.is_empty());
        assert!(settings.skip_unchanged);
        assert!(!settings.load_existing);
        assert_eq!(settings.backend, BackendKind::Auto);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("hotroute.toml");
        std::fs::write(
            &config_path,
            r#"
folder = "/srv/routes"
debounce_ms = 20
recursive = true
extensions = ["xml", "toml"]
backend = "polling"
poll_interval_ms = 250

[logging]
default = "info"

[logging.modules]
"hotroute::watcher" = "debug"
"#,
        )
        .unwrap();

        let settings = ReloadSettings::load_from(&config_path).unwrap();
        assert_eq!(settings.folder, PathBuf::from("/srv/routes"));
        assert_eq!(settings.debounce(), Duration::from_millis(20));
        assert!(settings.recursive);
        assert_eq!(settings.extensions, vec!["xml", "toml"]);
        assert_eq!(
            settings.watch_backend(),
            WatchBackend::Polling {
                interval: Duration::from_millis(250)
            }
        );
        assert_eq!(settings.logging.default, "info");
        assert_eq!(
            settings.logging.modules.get("hotroute::watcher").map(String::as_str),
            Some("debug")
        );
    }

    #[test]
    fn test_zero_debounce_rejected() {
        let settings = ReloadSettings {
            debounce_ms: 0,
            ..ReloadSettings::for_folder("/tmp/routes")
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "debounce_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_folder_rejected() {
        let err = ReloadSettings::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "folder", .. }));
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let settings = ReloadSettings {
            retry_initial_ms: 5000,
            retry_max_ms: 100,
            ..ReloadSettings::for_folder("/tmp/routes")
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_watched_folder_from_settings() {
        let settings = ReloadSettings {
            recursive: true,
            extensions: vec![".XML".to_string()],
            ..ReloadSettings::for_folder("/srv/routes")
        };
        let folder = settings.watched_folder();
        assert!(folder.is_recursive());
        assert!(folder.accepts(Path::new("/srv/routes/nested/bar.xml")));
        assert!(!folder.accepts(Path::new("/srv/routes/bar.yaml")));
    }
}
