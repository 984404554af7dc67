//! Client configuration.

use codegauge_realtime::{ReconnectPolicy, DEFAULT_EVENT_CAPACITY};
use codegauge_types::UserId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::error::{Result, SyncError};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// JSON lines.
    Json,
}

impl FromStr for LogFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(SyncError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Configuration for the sync client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push endpoint (`ws://` or `wss://`).
    pub ws_url: String,
    /// REST API base URL.
    pub api_url: String,
    /// User to connect as; private topics need one.
    pub user_id: Option<UserId>,
    /// Bearer token for both REST and push.
    pub auth_token: Option<String>,
    /// Reconnect delays.
    pub reconnect: ReconnectPolicy,
    /// File holding persisted repository status.
    pub status_file: Option<PathBuf>,
    /// Claimed notification keys remembered per session.
    pub dedup_capacity: usize,
    /// Buffered events per stream.
    pub event_capacity: usize,
    /// Log level.
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            api_url: "http://127.0.0.1:8080".to_string(),
            user_id: None,
            auth_token: None,
            reconnect: ReconnectPolicy::default(),
            status_file: default_status_file(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// `<data dir>/codegauge/repo-status.json`, if the platform has a data dir.
pub fn default_status_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("codegauge").join("repo-status.json"))
}

impl SyncConfig {
    /// Loads a YAML config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid YAML, or does not pass
    /// [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| SyncError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config: SyncConfig = serde_yaml::from_str(&contents)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        tracing::info!(?path, "Loaded configuration");
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be loaded.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                tracing::info!(?path, "Config file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Checks the configuration for values the client cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(SyncError::Config(format!(
                "ws_url must start with ws:// or wss://: {}",
                self.ws_url
            )));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "api_url must start with http:// or https://: {}",
                self.api_url
            )));
        }
        if self.dedup_capacity == 0 {
            return Err(SyncError::Config("dedup_capacity must be positive".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Config("event_capacity must be positive".to_string()));
        }
        match self.reconnect {
            ReconnectPolicy::Fixed { delay_ms: 0 } => {
                return Err(SyncError::Config(
                    "reconnect delay_ms must be positive".to_string(),
                ));
            }
            ReconnectPolicy::Exponential {
                initial_ms,
                max_ms,
                multiplier,
                ..
            } => {
                if initial_ms == 0 || max_ms < initial_ms {
                    return Err(SyncError::Config(format!(
                        "reconnect delays must satisfy 0 < initial_ms <= max_ms: {initial_ms}, {max_ms}"
                    )));
                }
                // Also rejects NaN.
                if !(multiplier >= 1.0 && multiplier.is_finite()) {
                    return Err(SyncError::Config(format!(
                        "reconnect multiplier must be a finite number of at least 1: {multiplier}"
                    )));
                }
            }
            ReconnectPolicy::Fixed { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reconnect, ReconnectPolicy::default());
        assert_eq!(config.dedup_capacity, 4096);
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codegauge.yaml");
        fs::write(
            &path,
            r#"
ws_url: wss://dash.example.com/ws
api_url: https://dash.example.com
user_id: 42
reconnect:
  kind: exponential
  initial_ms: 1000
  max_ms: 30000
log_format: json
"#,
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.user_id, Some(UserId::from("42")));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(matches!(
            config.reconnect,
            ReconnectPolicy::Exponential {
                initial_ms: 1000,
                max_ms: 30000,
                ..
            }
        ));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let config = SyncConfig {
            ws_url: "http://wrong".to_string(),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            dedup_capacity: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_degenerate_reconnect_policies_are_rejected() {
        let with = |reconnect| SyncConfig {
            reconnect,
            ..SyncConfig::default()
        };
        let exponential = |initial_ms, max_ms, multiplier| ReconnectPolicy::Exponential {
            initial_ms,
            max_ms,
            multiplier,
            jitter: false,
        };

        assert!(with(ReconnectPolicy::Fixed { delay_ms: 0 }).validate().is_err());
        assert!(with(ReconnectPolicy::Fixed { delay_ms: 500 }).validate().is_ok());
        assert!(with(exponential(0, 1_000, 2.0)).validate().is_err());
        assert!(with(exponential(2_000, 1_000, 2.0)).validate().is_err());
        assert!(with(exponential(100, 1_000, f64::NAN)).validate().is_err());
        assert!(with(exponential(100, 1_000, f64::INFINITY)).validate().is_err());
        assert!(with(exponential(100, 1_000, 0.5)).validate().is_err());
        assert!(with(exponential(100, 1_000, 1.0)).validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_or_default(Some(&dir.path().join("absent.yaml"))).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
