//! TOML configuration file loading
//!
//! Supports `~/.config/family-locator/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct LocatorConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseFileConfig,

    /// Session and password settings
    #[serde(default)]
    pub security: SecurityFileConfig,

    /// Alert thresholds
    #[serde(default)]
    pub alerts: AlertsFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Address to bind (e.g. "0.0.0.0")
    pub bind_address: Option<String>,

    /// HTTP port
    pub port: Option<u16>,

    /// Directory of static assets served under `/static`
    pub static_dir: Option<String>,

    /// Requests per minute across every route
    pub rate_limit_per_minute: Option<u32>,
}

/// Database configuration
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseFileConfig {
    /// Path to the `SQLite` database file
    pub path: Option<String>,
}

/// Session and password settings
#[derive(Debug, Default, Deserialize)]
pub struct SecurityFileConfig {
    /// Secret used to sign cookies
    pub secret_key: Option<String>,

    /// Lifetime of a regular login session, in hours
    pub session_ttl_hours: Option<i64>,

    /// Lifetime of a "remember me" session, in days
    pub remember_ttl_days: Option<i64>,

    /// How often expired sessions are purged, in seconds
    pub session_purge_interval_secs: Option<u64>,

    /// bcrypt work factor
    pub bcrypt_cost: Option<u32>,
}

/// Alert thresholds
#[derive(Debug, Default, Deserialize)]
pub struct AlertsFileConfig {
    /// Battery percentage below which a low-battery alert is recorded
    pub low_battery_threshold: Option<f64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LocatorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> LocatorConfigFile {
    config_file_path().map_or_else(LocatorConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_from(path: &Path) -> LocatorConfigFile {
    if !path.exists() {
        return LocatorConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                LocatorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            LocatorConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/family-locator/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("family-locator").join("config.toml"))
}
