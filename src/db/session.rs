//! Web session repository backing the login cookie

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::OptionalExtension;

use super::{DbPool, conn, parse_datetime};
use crate::Result;

/// Random bytes in a session token
const SESSION_TOKEN_BYTES: usize = 32;

/// A login session
#[derive(Debug, Clone)]
pub struct WebSession {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WebSession {
    /// Check if the session has expired
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Generate a random hex session token
fn generate_token() -> String {
    let bytes: [u8; SESSION_TOKEN_BYTES] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// Session repository
#[derive(Clone)]
pub struct SessionRepo {
    pool: DbPool,
}

impl SessionRepo {
    /// Create a new session repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Start a session for a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, user_id: &str, ttl: Duration) -> Result<WebSession> {
        let conn = conn(&self.pool)?;

        let now = Utc::now();
        let session = WebSession {
            id: generate_token(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + ttl,
        };

        conn.execute(
            "INSERT INTO web_sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            [
                &session.id,
                &session.user_id,
                &session.created_at.to_rfc3339(),
                &session.expires_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!(user_id = %user_id, "session created");
        Ok(session)
    }

    /// Look up a session, ignoring (and removing) it if expired
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_active(&self, id: &str) -> Result<Option<WebSession>> {
        let conn = conn(&self.pool)?;

        let session = conn
            .query_row(
                "SELECT id, user_id, created_at, expires_at FROM web_sessions WHERE id = ?1",
                [id],
                |row| {
                    Ok(WebSession {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        created_at: parse_datetime(&row.get::<_, String>(2)?),
                        expires_at: parse_datetime(&row.get::<_, String>(3)?),
                    })
                },
            )
            .optional()?;

        match session {
            Some(s) if s.is_expired() => {
                conn.execute("DELETE FROM web_sessions WHERE id = ?1", [id])?;
                tracing::debug!(user_id = %s.user_id, "session expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// End a session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = conn(&self.pool)?;
        conn.execute("DELETE FROM web_sessions WHERE id = ?1", [id])?;
        Ok(())
    }

    /// End every session of a user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_for_user(&self, user_id: &str) -> Result<usize> {
        let conn = conn(&self.pool)?;
        let removed = conn.execute("DELETE FROM web_sessions WHERE user_id = ?1", [user_id])?;
        Ok(removed)
    }

    /// Remove all expired sessions; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = conn(&self.pool)?;
        let now = Utc::now().to_rfc3339();
        let removed = conn.execute("DELETE FROM web_sessions WHERE expires_at < ?1", [&now])?;

        if removed > 0 {
            tracing::info!(removed, "purged expired sessions");
        }
        Ok(removed)
    }
}
