//! Alert repository: geofence crossings and low-battery warnings

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::{DbPool, conn, parse_datetime};
use crate::{Error, Result};

/// What triggered an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Enter,
    Exit,
    LowBattery,
}

impl AlertKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::LowBattery => "low_battery",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "enter" => Some(Self::Enter),
            "exit" => Some(Self::Exit),
            "low_battery" => Some(Self::LowBattery),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded alert
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub child_id: String,
    pub child_name: String,
    pub geofence_id: Option<String>,
    pub kind: AlertKind,
    pub message: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

const ALERT_SELECT: &str = "SELECT a.id, a.child_id, c.name, a.geofence_id, a.kind, a.message, \
                            a.acknowledged, a.created_at \
                            FROM alerts a JOIN children c ON c.id = a.child_id";

fn alert_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let kind: String = row.get(4)?;
    Ok(Alert {
        id: row.get(0)?,
        child_id: row.get(1)?,
        child_name: row.get(2)?,
        geofence_id: row.get(3)?,
        kind: AlertKind::parse(&kind).unwrap_or(AlertKind::Enter),
        message: row.get(5)?,
        acknowledged: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Insert an alert on an existing connection and read it back
pub(crate) fn record_with(
    conn: &Connection,
    child_id: &str,
    geofence_id: Option<&str>,
    kind: AlertKind,
    message: &str,
) -> Result<Alert> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO alerts (id, child_id, geofence_id, kind, message, acknowledged, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        rusqlite::params![id, child_id, geofence_id, kind.as_str(), message, now.to_rfc3339()],
    )?;

    tracing::info!(alert_id = %id, child_id = %child_id, kind = %kind, "alert recorded");

    let alert = conn.query_row(
        &format!("{ALERT_SELECT} WHERE a.id = ?1"),
        [&id],
        alert_from_row,
    )?;
    Ok(alert)
}

/// Alert repository
#[derive(Clone)]
pub struct AlertRepo {
    pool: DbPool,
}

impl AlertRepo {
    /// Create a new alert repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record an alert
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn record(
        &self,
        child_id: &str,
        geofence_id: Option<&str>,
        kind: AlertKind,
        message: &str,
    ) -> Result<Alert> {
        let conn = conn(&self.pool)?;
        record_with(&conn, child_id, geofence_id, kind, message)
    }

    /// Most recent alerts for one child
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_child(&self, child_id: &str, limit: usize) -> Result<Vec<Alert>> {
        let conn = conn(&self.pool)?;

        let mut stmt = conn.prepare(&format!(
            "{ALERT_SELECT} WHERE a.child_id = ?1 ORDER BY a.created_at DESC, a.rowid DESC LIMIT ?2"
        ))?;

        let alerts = stmt
            .query_map(rusqlite::params![child_id, limit_param(limit)], alert_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(alerts)
    }

    /// Most recent alerts across all of a parent's children
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_for_parent(&self, parent_id: &str, limit: usize) -> Result<Vec<Alert>> {
        let conn = conn(&self.pool)?;

        let mut stmt = conn.prepare(&format!(
            "{ALERT_SELECT} WHERE c.parent_id = ?1 ORDER BY a.created_at DESC, a.rowid DESC LIMIT ?2"
        ))?;

        let alerts = stmt
            .query_map(rusqlite::params![parent_id, limit_param(limit)], alert_from_row)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(alerts)
    }

    /// Count a parent's unacknowledged alerts
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count_unacknowledged(&self, parent_id: &str) -> Result<usize> {
        let conn = conn(&self.pool)?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts a JOIN children c ON c.id = a.child_id
             WHERE c.parent_id = ?1 AND a.acknowledged = 0",
            [parent_id],
            |row| row.get(0),
        )?;

        usize::try_from(count).map_err(|e| Error::Database(e.to_string()))
    }

    /// Mark one of a parent's alerts as seen; returns false if not found
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn acknowledge(&self, id: &str, parent_id: &str) -> Result<bool> {
        let conn = conn(&self.pool)?;

        let changed = conn.execute(
            "UPDATE alerts SET acknowledged = 1
             WHERE id = ?1
               AND child_id IN (SELECT id FROM children WHERE parent_id = ?2)",
            [id, parent_id],
        )?;

        Ok(changed > 0)
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
