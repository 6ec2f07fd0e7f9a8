//! Configuration management for the family locator
//!
//! Values are layered: defaults, then the TOML file, then environment
//! variables. CLI flags are applied on top by the binary.

pub mod file;

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha512};

use crate::{Error, Result};

use file::LocatorConfigFile;

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5000;

/// Stylesheets and other assets shipped with the crate
pub const BUNDLED_STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

/// Default battery percentage below which an alert is recorded
pub const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 15.0;

/// Family locator configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Path to the `SQLite` database file
    pub database_path: PathBuf,

    /// Session, cookie, and password configuration
    pub security: SecurityConfig,

    /// Alert thresholds
    pub alerts: AlertConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: IpAddr,

    /// Port to listen on
    pub port: u16,

    /// Directory of static assets served under `/static`
    pub static_dir: PathBuf,

    /// Requests per minute across every route; `None` disables limiting
    pub rate_limit_per_minute: Option<u32>,
}

/// Session, cookie, and password configuration
#[derive(Debug)]
pub struct SecurityConfig {
    /// Secret used to derive the cookie signing key
    pub secret_key: SecretString,

    /// Lifetime of a regular login session, in hours
    pub session_ttl_hours: i64,

    /// Lifetime of a "remember me" session, in days
    pub remember_ttl_days: i64,

    /// How often expired sessions are purged, in seconds
    pub session_purge_interval_secs: u64,

    /// bcrypt work factor
    pub bcrypt_cost: u32,
}

impl SecurityConfig {
    /// Derive the 64-byte cookie signing key material from the secret
    #[must_use]
    pub fn cookie_key_material(&self) -> [u8; 64] {
        let digest = Sha512::digest(self.secret_key.expose_secret().as_bytes());
        let mut out = [0u8; 64];
        out.copy_from_slice(&digest);
        out
    }

    /// Session lifetime for a login, depending on "remember me"
    #[must_use]
    pub fn session_ttl(&self, remember: bool) -> chrono::Duration {
        if remember {
            chrono::Duration::days(self.remember_ttl_days)
        } else {
            chrono::Duration::hours(self.session_ttl_hours)
        }
    }
}

/// Alert thresholds
#[derive(Debug, Clone, Copy)]
pub struct AlertConfig {
    /// Battery percentage below which a low-battery alert is recorded
    pub low_battery_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
        }
    }
}

impl Config {
    /// Load configuration from the standard config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(None)
    }

    /// Load configuration, optionally from an explicit config file path
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn load_with_options(config_path: Option<&Path>) -> Result<Self> {
        let fc = config_path.map_or_else(file::load_config_file, file::load_from);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a value is present but invalid
    pub fn from_sources<F>(fc: LocatorConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_address = env("FAMILY_BIND_ADDRESS")
            .or(fc.server.bind_address)
            .map_or(Ok(IpAddr::from([0, 0, 0, 0])), |s| {
                s.parse()
                    .map_err(|e| Error::Config(format!("invalid bind address {s:?}: {e}")))
            })?;

        let server = ServerConfig {
            bind_address,
            port: env("FAMILY_PORT")
                .or_else(|| env("PORT"))
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            static_dir: env("FAMILY_STATIC_DIR")
                .or(fc.server.static_dir)
                .map_or_else(|| PathBuf::from(BUNDLED_STATIC_DIR), PathBuf::from),
            rate_limit_per_minute: env("FAMILY_RATE_LIMIT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.rate_limit_per_minute)
                .filter(|rpm| *rpm > 0),
        };

        let database_path = match env("DATABASE_URL") {
            Some(url) => parse_database_url(&url)?,
            None => env("DATABASE_PATH")
                .or(fc.database.path)
                .map_or_else(default_database_path, PathBuf::from),
        };

        let secret_key = env("SECRET_KEY")
            .or(fc.security.secret_key)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                tracing::warn!(
                    "SECRET_KEY not set - using an ephemeral key, sessions will not survive restarts"
                );
                ephemeral_secret()
            });

        let bcrypt_cost = env("FAMILY_BCRYPT_COST")
            .and_then(|s| s.parse().ok())
            .or(fc.security.bcrypt_cost)
            .unwrap_or(bcrypt::DEFAULT_COST);
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(Error::Config(format!(
                "bcrypt cost must be between 4 and 31, got {bcrypt_cost}"
            )));
        }

        let security = SecurityConfig {
            secret_key: SecretString::from(secret_key),
            session_ttl_hours: env("FAMILY_SESSION_TTL_HOURS")
                .and_then(|s| s.parse().ok())
                .or(fc.security.session_ttl_hours)
                .unwrap_or(24)
                .max(1),
            remember_ttl_days: env("FAMILY_REMEMBER_TTL_DAYS")
                .and_then(|s| s.parse().ok())
                .or(fc.security.remember_ttl_days)
                .unwrap_or(30)
                .max(1),
            session_purge_interval_secs: fc
                .security
                .session_purge_interval_secs
                .unwrap_or(3600)
                .max(60),
            bcrypt_cost,
        };

        let low_battery_threshold = env("FAMILY_LOW_BATTERY_THRESHOLD")
            .and_then(|s| s.parse().ok())
            .or(fc.alerts.low_battery_threshold)
            .unwrap_or(DEFAULT_LOW_BATTERY_THRESHOLD);
        if !(0.0..=100.0).contains(&low_battery_threshold) {
            return Err(Error::Config(format!(
                "low battery threshold must be a percentage, got {low_battery_threshold}"
            )));
        }

        Ok(Self {
            server,
            database_path,
            security,
            alerts: AlertConfig {
                low_battery_threshold,
            },
        })
    }
}

/// Default database location (`~/.local/share/family-locator/family.db` on Linux)
fn default_database_path() -> PathBuf {
    let data_dir = directories::ProjectDirs::from("org", "family-locator", "family-locator")
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().to_path_buf());

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(
            path = %data_dir.display(),
            error = %e,
            "failed to create data directory"
        );
    }

    data_dir.join("family.db")
}

/// Accept `sqlite://relative.db` and `sqlite:///absolute.db` style URLs
fn parse_database_url(url: &str) -> Result<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .ok_or_else(|| {
            Error::Config(format!(
                "unsupported DATABASE_URL scheme (only sqlite is supported): {url}"
            ))
        })?;

    if path.is_empty() {
        return Err(Error::Config("DATABASE_URL has an empty path".to_string()));
    }

    Ok(PathBuf::from(path))
}

fn ephemeral_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}
