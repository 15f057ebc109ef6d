//! Server configuration.
//!
//! Deployment knobs come from environment variables, tunables from an
//! optional TOML file named by `SKYGUARD_CONFIG`. Every tunable has a
//! default, so the server runs without a file.
//!
//! ```toml
//! [aggregation]
//! attach_radius_km = 2.0
//! window_minutes = 120
//! min_cluster_authors = 5
//!
//! [notify]
//! alert_radius_km = 30.0
//!
//! [telegram]
//! bot_username = "skyguard_bot"
//!
//! [[auth.tokens]]
//! token = "change-me"
//! user_id = 1
//! admin = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skyguard_incidents::AggregationSettings;
use skyguard_notify::NotifySettings;

use crate::auth::TokenEntry;

/// Environment variable naming the TOML configuration file.
pub const CONFIG_ENV: &str = "SKYGUARD_CONFIG";

/// Errors while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// Authentication settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted bearer tokens.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// Telegram settings. The bot token itself is only read from the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot username used to build link-code deep links.
    #[serde(default = "default_bot_username")]
    pub bot_username: String,
    /// Bot API endpoint.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_bot_username() -> String {
    "skyguard_bot".to_string()
}

fn default_api_base() -> String {
    skyguard_telegram::DEFAULT_API_BASE.to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_username: default_bot_username(),
            api_base: default_api_base(),
        }
    }
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkyGuardConfig {
    /// Clustering thresholds.
    #[serde(default)]
    pub aggregation: AggregationSettings,
    /// Alert fan-out settings.
    #[serde(default)]
    pub notify: NotifySettings,
    /// Telegram settings.
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Bearer tokens.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl SkyGuardConfig {
    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`toml::de::Error`] if the text is malformed.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the file named by `SKYGUARD_CONFIG`, or the defaults if the
    /// variable is unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the named file cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                log::info!("Loading configuration from {path}");
                Self::load(Path::new(path.trim()))
            }
            _ => {
                log::info!("{CONFIG_ENV} not set, using default configuration");
                Ok(Self::default())
            }
        }
    }
}

/// Address the HTTP server binds to, from `BIND_ADDR` and `PORT`.
#[must_use]
pub fn bind_address() -> (String, u16) {
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    (bind_addr, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = SkyGuardConfig::from_toml("").unwrap();
        assert_eq!(config, SkyGuardConfig::default());
        assert!((config.aggregation.attach_radius_km - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.aggregation.min_cluster_authors, 5);
        assert!((config.notify.alert_radius_km - 30.0).abs() < f64::EPSILON);
        assert_eq!(config.telegram.bot_username, "skyguard_bot");
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = SkyGuardConfig::from_toml(
            r#"
            [aggregation]
            min_cluster_authors = 3

            [notify]
            concurrency = 4

            [[auth.tokens]]
            token = "abc"
            user_id = 7
            admin = true

            [[auth.tokens]]
            token = "def"
            user_id = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.aggregation.min_cluster_authors, 3);
        assert_eq!(config.aggregation.window_minutes, 120);
        assert_eq!(config.notify.concurrency, 4);
        assert_eq!(config.notify.delivery_timeout_secs, 10);
        assert_eq!(config.auth.tokens.len(), 2);
        assert!(config.auth.tokens[0].admin);
        assert!(!config.auth.tokens[1].admin);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(SkyGuardConfig::from_toml("[aggregation\n").is_err());
        assert!(SkyGuardConfig::from_toml("[aggregation]\nwindow_minutes = \"soon\"").is_err());
    }
}
