//! Error types for the family locator

use thiserror::Error;

/// Result type alias for family locator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the family locator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Database error (pool, migration, or query)
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness conflict (duplicate email, already linked account)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authentication error (no session, bad credentials)
    #[error("auth error: {0}")]
    Auth(String),

    /// Authenticated, but the role or ownership does not permit the action
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed or out-of-range input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Pairing code error
    #[error("pairing error: {0}")]
    Pairing(String),

    /// Password hashing error
    #[error("password error: {0}")]
    Password(#[from] bcrypt::BcryptError),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(#[from] askama::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error is caused by the caller rather than the server
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Conflict(_)
                | Self::Auth(_)
                | Self::Forbidden(_)
                | Self::InvalidInput(_)
                | Self::Pairing(_)
        )
    }
}
