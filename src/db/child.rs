//! Child repository: tracked children, pairing codes, and last known position

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::{DbPool, conn, is_unique_violation, parse_datetime};
use crate::geo::Coordinate;
use crate::security::pairing;
use crate::{Error, Result};

/// Attempts at drawing an unused pairing code before giving up
pub const MAX_CODE_ATTEMPTS: usize = 16;

/// Maximum child name length
pub const MAX_NAME_LEN: usize = 100;

/// Trim and check a child's display name
///
/// # Errors
///
/// Returns `Error::InvalidInput` for an empty or overlong name
pub fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

/// A tracked child
#[derive(Debug, Clone, Serialize)]
pub struct Child {
    pub id: String,
    pub name: String,
    /// Present until both a parent and a child account are linked
    pub pairing_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub battery_level: Option<f64>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Child {
    /// Last reported position, if any
    #[must_use]
    pub fn position(&self) -> Option<Coordinate> {
        Coordinate::new(self.latitude?, self.longitude?).ok()
    }

    /// Whether both a parent and a child account are linked
    #[must_use]
    pub const fn is_fully_paired(&self) -> bool {
        self.parent_id.is_some() && self.user_id.is_some()
    }
}

const CHILD_COLUMNS: &str = "id, name, pairing_code, latitude, longitude, battery_level, \
                             last_seen_at, parent_id, user_id, created_at";

fn child_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Child> {
    Ok(Child {
        id: row.get(0)?,
        name: row.get(1)?,
        pairing_code: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        battery_level: row.get(5)?,
        last_seen_at: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_datetime(&s)),
        parent_id: row.get(7)?,
        user_id: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

pub(crate) fn find_with(conn: &Connection, id: &str) -> Result<Option<Child>> {
    let child = conn
        .query_row(
            &format!("SELECT {CHILD_COLUMNS} FROM children WHERE id = ?1"),
            [id],
            child_from_row,
        )
        .optional()?;
    Ok(child)
}

/// Store a position on an existing connection; a missing battery keeps the old value
pub(crate) fn update_location_with(
    conn: &Connection,
    id: &str,
    position: Coordinate,
    battery_level: Option<f64>,
    at: DateTime<Utc>,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE children
         SET latitude = ?1, longitude = ?2,
             battery_level = COALESCE(?3, battery_level),
             last_seen_at = ?4
         WHERE id = ?5",
        rusqlite::params![
            position.latitude,
            position.longitude,
            battery_level,
            at.to_rfc3339(),
            id
        ],
    )?;

    if changed == 0 {
        return Err(Error::NotFound(format!("child {id}")));
    }

    Ok(())
}

fn is_pairing_code_collision(err: &rusqlite::Error) -> bool {
    is_unique_violation(err)
        && matches!(err, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("pairing_code"))
}

/// Child repository
#[derive(Clone)]
pub struct ChildRepo {
    pool: DbPool,
}

impl ChildRepo {
    /// Create a new child repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a child owned by a parent, awaiting a child account
    ///
    /// # Errors
    ///
    /// Returns `Error::Pairing` if no unique code could be drawn, or a
    /// database error
    pub fn create_for_parent(&self, parent_id: &str, name: &str) -> Result<Child> {
        self.create_with(name, Some(parent_id), None, pairing::generate_code)
    }

    /// Create a child record for a child account, awaiting a parent
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the account is already linked to a child,
    /// `Error::Pairing` if no unique code could be drawn, or a database error
    pub fn create_for_user(&self, user_id: &str, name: &str) -> Result<Child> {
        self.create_with(name, None, Some(user_id), pairing::generate_code)
    }

    /// Insert a child, retrying code generation on collision
    pub(crate) fn create_with<F>(
        &self,
        name: &str,
        parent_id: Option<&str>,
        user_id: Option<&str>,
        mut next_code: F,
    ) -> Result<Child>
    where
        F: FnMut() -> String,
    {
        let name = validate_name(name)?;
        let conn = conn(&self.pool)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = next_code();
            let inserted = conn.execute(
                "INSERT INTO children (id, name, pairing_code, parent_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, name, code, parent_id, user_id, now],
            );

            match inserted {
                Ok(_) => {
                    tracing::info!(child_id = %id, "child created");
                    return find_with(&conn, &id)?
                        .ok_or_else(|| Error::NotFound(format!("child {id}")));
                }
                Err(e) if is_pairing_code_collision(&e) => {
                    tracing::debug!(attempt, "pairing code collision, retrying");
                }
                Err(e) if is_unique_violation(&e) => {
                    return Err(Error::Conflict(
                        "this account is already linked to a child".to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Pairing(
            "could not generate a unique pairing code".to_string(),
        ))
    }

    /// Find a child by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, id: &str) -> Result<Option<Child>> {
        let conn = conn(&self.pool)?;
        find_with(&conn, id)
    }

    /// Find a child only if it belongs to the given parent
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_for_parent(&self, id: &str, parent_id: &str) -> Result<Option<Child>> {
        let conn = conn(&self.pool)?;

        let child = conn
            .query_row(
                &format!("SELECT {CHILD_COLUMNS} FROM children WHERE id = ?1 AND parent_id = ?2"),
                [id, parent_id],
                child_from_row,
            )
            .optional()?;

        Ok(child)
    }

    /// Find the child record linked to a child account
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_user(&self, user_id: &str) -> Result<Option<Child>> {
        let conn = conn(&self.pool)?;

        let child = conn
            .query_row(
                &format!("SELECT {CHILD_COLUMNS} FROM children WHERE user_id = ?1"),
                [user_id],
                child_from_row,
            )
            .optional()?;

        Ok(child)
    }

    /// List a parent's children, by name
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_parent(&self, parent_id: &str) -> Result<Vec<Child>> {
        let conn = conn(&self.pool)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {CHILD_COLUMNS} FROM children WHERE parent_id = ?1 ORDER BY name COLLATE NOCASE"
        ))?;

        let children = stmt
            .query_map([parent_id], child_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(children)
    }

    /// Attach a parent to the child holding `code`
    ///
    /// Returns `None` when the code is unknown or the child already has a
    /// parent. The code is consumed when the child account is already linked.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn claim_by_parent(&self, code: &str, parent_id: &str) -> Result<Option<Child>> {
        let mut conn = conn(&self.pool)?;
        let tx = conn.transaction()?;

        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM children WHERE pairing_code = ?1 AND parent_id IS NULL",
                [code],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE children
             SET parent_id = ?1,
                 pairing_code = CASE WHEN user_id IS NULL THEN pairing_code ELSE NULL END
             WHERE id = ?2 AND parent_id IS NULL",
            [parent_id, id.as_str()],
        )?;

        if changed == 0 {
            return Ok(None);
        }

        let child = find_with(&tx, &id)?;
        tx.commit()?;
        Ok(child)
    }

    /// Attach a child account to the child holding `code`
    ///
    /// Returns `None` when the code is unknown or the child already has an
    /// account. The code is consumed when a parent is already linked.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the account is already linked to another
    /// child, or a database error
    pub fn link_user(&self, code: &str, user_id: &str) -> Result<Option<Child>> {
        let mut conn = conn(&self.pool)?;
        let tx = conn.transaction()?;

        let already_linked: Option<String> = tx
            .query_row(
                "SELECT id FROM children WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .optional()?;
        if already_linked.is_some() {
            return Err(Error::Conflict(
                "this account is already linked to a child".to_string(),
            ));
        }

        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM children WHERE pairing_code = ?1 AND user_id IS NULL",
                [code],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE children
             SET user_id = ?1,
                 pairing_code = CASE WHEN parent_id IS NULL THEN pairing_code ELSE NULL END
             WHERE id = ?2 AND user_id IS NULL",
            [user_id, id.as_str()],
        )?;

        if changed == 0 {
            return Ok(None);
        }

        let child = find_with(&tx, &id)?;
        tx.commit()?;
        Ok(child)
    }

    /// Replace the pairing code of a child that is still awaiting a link
    ///
    /// Returns `None` if the child is fully paired or does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::Pairing` if no unique code could be drawn, or a
    /// database error
    pub fn regenerate_code(&self, id: &str) -> Result<Option<String>> {
        self.regenerate_code_with(id, pairing::generate_code)
    }

    pub(crate) fn regenerate_code_with<F>(&self, id: &str, mut next_code: F) -> Result<Option<String>>
    where
        F: FnMut() -> String,
    {
        let conn = conn(&self.pool)?;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = next_code();
            let updated = conn.execute(
                "UPDATE children SET pairing_code = ?1
                 WHERE id = ?2 AND (parent_id IS NULL OR user_id IS NULL)",
                [code.as_str(), id],
            );

            match updated {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    tracing::info!(child_id = %id, "pairing code regenerated");
                    return Ok(Some(code));
                }
                Err(e) if is_pairing_code_collision(&e) => {
                    tracing::debug!(attempt, "pairing code collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Pairing(
            "could not generate a unique pairing code".to_string(),
        ))
    }

    /// Store a new position and, when given, battery level
    ///
    /// A missing battery reading keeps the previous value.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the child does not exist
    pub fn update_location(
        &self,
        id: &str,
        position: Coordinate,
        battery_level: Option<f64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = conn(&self.pool)?;
        update_location_with(&conn, id, position, battery_level, at)
    }

    /// Delete a parent's child, with its geofences and alerts
    ///
    /// Returns false if the child does not belong to the parent.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_for_parent(&self, id: &str, parent_id: &str) -> Result<bool> {
        let conn = conn(&self.pool)?;

        let changed = conn.execute(
            "DELETE FROM children WHERE id = ?1 AND parent_id = ?2",
            [id, parent_id],
        )?;

        if changed > 0 {
            tracing::info!(child_id = %id, parent_id = %parent_id, "child removed");
        }
        Ok(changed > 0)
    }
}
