//! Geofence repository

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::{DbPool, conn, parse_datetime};
use crate::geo::{Coordinate, Fence};
use crate::{Error, Result};

/// Maximum geofence name length
pub const MAX_NAME_LEN: usize = 100;

/// A stored geofence
#[derive(Debug, Clone, Serialize)]
pub struct GeofenceRecord {
    pub id: String,
    pub child_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters
    pub radius: f64,
    pub created_at: DateTime<Utc>,
}

impl GeofenceRecord {
    /// The region this record describes
    ///
    /// Rows are validated on insert, so this only fails on a hand-edited database.
    #[must_use]
    pub fn fence(&self) -> Option<Fence> {
        let center = Coordinate::new(self.latitude, self.longitude).ok()?;
        Fence::new(center, self.radius).ok()
    }
}

/// A validated geofence awaiting insertion
#[derive(Debug, Clone)]
pub struct NewGeofence {
    pub name: String,
    pub fence: Fence,
}

impl NewGeofence {
    /// Validate raw geofence input
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an empty or overlong name, bad
    /// coordinates, or a bad radius
    pub fn new(name: &str, latitude: f64, longitude: f64, radius: f64) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("geofence name is required".to_string()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::InvalidInput(format!(
                "geofence name must be at most {MAX_NAME_LEN} characters"
            )));
        }

        let center = Coordinate::new(latitude, longitude)?;
        let fence = Fence::new(center, radius)?;

        Ok(Self {
            name: name.to_string(),
            fence,
        })
    }
}

fn geofence_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GeofenceRecord> {
    Ok(GeofenceRecord {
        id: row.get(0)?,
        child_id: row.get(1)?,
        name: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        radius: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

/// A child's geofences on an existing connection, oldest first
pub(crate) fn list_for_child_with(conn: &Connection, child_id: &str) -> Result<Vec<GeofenceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, child_id, name, latitude, longitude, radius, created_at
         FROM geofences WHERE child_id = ?1 ORDER BY created_at, name",
    )?;

    let fences = stmt
        .query_map([child_id], geofence_from_row)?
        .filter_map(std::result::Result::ok)
        .collect();

    Ok(fences)
}

/// Geofence repository
#[derive(Clone)]
pub struct GeofenceRepo {
    pool: DbPool,
}

impl GeofenceRepo {
    /// Create a new geofence repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store a geofence for a child
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails (including an unknown child)
    pub fn create(&self, child_id: &str, geofence: &NewGeofence) -> Result<GeofenceRecord> {
        let conn = conn(&self.pool)?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO geofences (id, child_id, name, latitude, longitude, radius, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                child_id,
                geofence.name,
                geofence.fence.center.latitude,
                geofence.fence.center.longitude,
                geofence.fence.radius_m,
                now.to_rfc3339()
            ],
        )?;

        tracing::info!(geofence_id = %id, child_id = %child_id, "geofence saved");

        Ok(GeofenceRecord {
            id,
            child_id: child_id.to_string(),
            name: geofence.name.clone(),
            latitude: geofence.fence.center.latitude,
            longitude: geofence.fence.center.longitude,
            radius: geofence.fence.radius_m,
            created_at: now,
        })
    }

    /// List a child's geofences, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_child(&self, child_id: &str) -> Result<Vec<GeofenceRecord>> {
        let conn = conn(&self.pool)?;
        list_for_child_with(&conn, child_id)
    }

    /// Find a child's geofence
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find(&self, child_id: &str, id: &str) -> Result<Option<GeofenceRecord>> {
        let conn = conn(&self.pool)?;

        let fence = conn
            .query_row(
                "SELECT id, child_id, name, latitude, longitude, radius, created_at
                 FROM geofences WHERE child_id = ?1 AND id = ?2",
                [child_id, id],
                geofence_from_row,
            )
            .optional()?;

        Ok(fence)
    }

    /// Delete a child's geofence; returns false if it did not exist
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, child_id: &str, id: &str) -> Result<bool> {
        let conn = conn(&self.pool)?;

        let changed = conn.execute(
            "DELETE FROM geofences WHERE child_id = ?1 AND id = ?2",
            [child_id, id],
        )?;

        if changed > 0 {
            tracing::info!(geofence_id = %id, child_id = %child_id, "geofence deleted");
        }
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ChildRepo, Role, UserRepo, init_memory};

    fn setup() -> (GeofenceRepo, ChildRepo, String) {
        let pool = init_memory().unwrap();
        let parent = UserRepo::new(pool.clone())
            .create("p@example.com", "h", Role::Parent)
            .unwrap();
        let children = ChildRepo::new(pool.clone());
        let child = children.create_for_parent(&parent.id, "Ada").unwrap();
        (GeofenceRepo::new(pool), children, child.id)
    }

    #[test]
    fn test_new_geofence_validation() {
        assert!(NewGeofence::new("Home", 51.5, -0.1, 100.0).is_ok());
        assert!(NewGeofence::new("   ", 51.5, -0.1, 100.0).is_err());
        assert!(NewGeofence::new(&"x".repeat(MAX_NAME_LEN + 1), 51.5, -0.1, 100.0).is_err());
        assert!(NewGeofence::new("Home", 91.0, -0.1, 100.0).is_err());
        assert!(NewGeofence::new("Home", 51.5, -0.1, 0.0).is_err());

        let trimmed = NewGeofence::new("  School ", 51.5, -0.1, 100.0).unwrap();
        assert_eq!(trimmed.name, "School");
    }

    #[test]
    fn test_create_list_delete() {
        let (repo, _, child_id) = setup();

        let home = repo
            .create(&child_id, &NewGeofence::new("Home", 51.5, -0.1, 150.0).unwrap())
            .unwrap();
        repo.create(&child_id, &NewGeofence::new("School", 51.52, -0.11, 300.0).unwrap())
            .unwrap();

        let fences = repo.list_for_child(&child_id).unwrap();
        assert_eq!(fences.len(), 2);
        assert!(fences.iter().all(|f| f.fence().is_some()));

        assert!(repo.find(&child_id, &home.id).unwrap().is_some());
        assert!(repo.find("other-child", &home.id).unwrap().is_none());

        assert!(!repo.delete("other-child", &home.id).unwrap());
        assert!(repo.delete(&child_id, &home.id).unwrap());
        assert_eq!(repo.list_for_child(&child_id).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_child_rejected() {
        let (repo, _, _) = setup();
        let result = repo.create("missing", &NewGeofence::new("Home", 0.0, 0.0, 10.0).unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn test_deleting_child_removes_geofences() {
        let (repo, children, child_id) = setup();
        repo.create(&child_id, &NewGeofence::new("Home", 0.0, 0.0, 10.0).unwrap())
            .unwrap();

        let parent_id = children.find(&child_id).unwrap().unwrap().parent_id.unwrap();
        children.delete_for_parent(&child_id, &parent_id).unwrap();

        assert!(repo.list_for_child(&child_id).unwrap().is_empty());
    }
}
