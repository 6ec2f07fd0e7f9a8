//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Accounts (parents and children)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'parent' CHECK(role IN ('parent', 'child')),
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Tracked children; pairing_code is NULL once both sides are linked
        CREATE TABLE IF NOT EXISTS children (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            pairing_code TEXT UNIQUE,
            latitude REAL,
            longitude REAL,
            battery_level REAL,
            last_seen_at TEXT,
            parent_id TEXT REFERENCES users(id) ON DELETE SET NULL,
            user_id TEXT UNIQUE REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_children_parent ON children(parent_id);

        -- Circular geofences around a point
        CREATE TABLE IF NOT EXISTS geofences (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            radius REAL NOT NULL CHECK(radius > 0),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_geofences_child ON geofences(child_id);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Geofence crossings and battery warnings
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            child_id TEXT NOT NULL REFERENCES children(id) ON DELETE CASCADE,
            geofence_id TEXT REFERENCES geofences(id) ON DELETE SET NULL,
            kind TEXT NOT NULL CHECK(kind IN ('enter', 'exit', 'low_battery')),
            message TEXT NOT NULL,
            acknowledged INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_child ON alerts(child_id, created_at);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (alerts)");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Server-side login sessions referenced by the signed cookie
        CREATE TABLE IF NOT EXISTS web_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_web_sessions_user ON web_sessions(user_id);

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::info!("migrated to schema v3 (web sessions)");
    Ok(())
}
