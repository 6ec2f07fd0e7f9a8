//! User repository for account CRUD operations

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DbPool, conn, is_unique_violation, parse_datetime};
use crate::{Error, Result};

/// Maximum stored email length
pub const MAX_EMAIL_LEN: usize = 120;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Views and manages children
    #[default]
    Parent,

    /// Reports its own location
    Child,
}

impl Role {
    /// Database/wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }

    /// Parse from string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            _ => None,
        }
    }

    /// Dashboard path for this role
    #[must_use]
    pub const fn dashboard_path(self) -> &'static str {
        match self {
            Self::Parent => "/parent_dashboard",
            Self::Child => "/child_dashboard",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered account
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Normalize an email address for storage and lookup
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Check that an (already normalized) email is plausibly deliverable
///
/// # Errors
///
/// Returns `Error::InvalidInput` describing the problem
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(Error::InvalidInput("email is required".to_string()));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(Error::InvalidInput(format!(
            "email must be at most {MAX_EMAIL_LEN} characters"
        )));
    }
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
    });
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput("email address is not valid".to_string()));
    }
    Ok(())
}

const USER_COLUMNS: &str = "id, email, password_hash, role, is_active, created_at";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        role: Role::parse(&role).unwrap_or_default(),
        is_active: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

/// User repository
#[derive(Clone)]
pub struct UserRepo {
    pool: DbPool,
}

impl UserRepo {
    /// Create a new user repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an account
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the email is already registered, or a
    /// database error
    pub fn create(&self, email: &str, password_hash: &str, role: Role) -> Result<User> {
        let conn = conn(&self.pool)?;

        let email = normalize_email(email);
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO users (id, email, password_hash, role, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![id, email, password_hash, role.as_str(), now.to_rfc3339()],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::Conflict(format!("an account with email {email} already exists"))
            } else {
                Error::Database(e.to_string())
            }
        })?;

        tracing::info!(user_id = %id, role = %role, "user created");

        Ok(User {
            id,
            email,
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            created_at: now,
        })
    }

    /// Find a user by ID (returns None if not found)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: &str) -> Result<Option<User>> {
        let conn = conn(&self.pool)?;

        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    /// Find a user by email, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = conn(&self.pool)?;

        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [normalize_email(email)],
                user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    /// List all users
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_all(&self) -> Result<Vec<User>> {
        let conn = conn(&self.pool)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))?;

        let users = stmt
            .query_map([], user_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(users)
    }

    /// Enable or disable an account
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such user exists
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = conn(&self.pool)?;

        let changed = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            rusqlite::params![active, id],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(format!("user {id}")));
        }

        tracing::info!(user_id = %id, active, "user activation changed");
        Ok(())
    }
}
