//! Location intake: stores a child's reading and turns it into alerts

use chrono::Utc;
use rusqlite::TransactionBehavior;

use crate::db::{self, Alert, AlertKind, Child, DbPool, alert, child, geofence};
use crate::geo::{self, Coordinate, Transition};
use crate::{Error, Result};

/// One position report from a child device
#[derive(Debug, Clone, Copy)]
pub struct LocationReading {
    pub position: Coordinate,
    pub battery_level: Option<f64>,
}

impl LocationReading {
    /// Validate a raw reading
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for out-of-range coordinates or battery
    pub fn new(latitude: f64, longitude: f64, battery_level: Option<f64>) -> Result<Self> {
        let position = Coordinate::new(latitude, longitude)?;

        if let Some(level) = battery_level
            && !(level.is_finite() && (0.0..=100.0).contains(&level))
        {
            return Err(Error::InvalidInput(format!(
                "battery level must be between 0 and 100, got {level}"
            )));
        }

        Ok(Self {
            position,
            battery_level,
        })
    }
}

/// Whether a battery reading crosses below the threshold
///
/// A first reading already below the threshold counts as a crossing.
#[must_use]
pub fn battery_dropped_below(previous: Option<f64>, current: f64, threshold: f64) -> bool {
    current < threshold && previous.is_none_or(|p| p >= threshold)
}

/// Records readings and raises geofence and battery alerts
#[derive(Clone)]
pub struct LocationTracker {
    pool: DbPool,
    low_battery_threshold: f64,
}

impl LocationTracker {
    /// Create a new tracker
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool, low_battery_threshold: f64) -> Self {
        Self {
            pool,
            low_battery_threshold,
        }
    }

    /// Battery percentage below which an alert is raised
    #[must_use]
    pub const fn low_battery_threshold(&self) -> f64 {
        self.low_battery_threshold
    }

    /// Store a reading for a child and return the alerts it produced
    ///
    /// The previous position and battery are read inside the same write
    /// transaction that stores the reading and its alerts, so overlapping
    /// reports each see the other's result and a failed alert insert leaves
    /// the old position in place.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the child disappeared, or a database error
    pub fn record(&self, child: &Child, reading: &LocationReading) -> Result<Vec<Alert>> {
        let mut conn = db::conn(&self.pool)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored = child::find_with(&tx, &child.id)?
            .ok_or_else(|| Error::NotFound(format!("child {}", child.id)))?;
        let previous = stored.position();
        let previous_battery = stored.battery_level;

        child::update_location_with(
            &tx,
            &stored.id,
            reading.position,
            reading.battery_level,
            Utc::now(),
        )?;

        let mut raised = Vec::new();

        let records = geofence::list_for_child_with(&tx, &stored.id)?;
        let fences: Vec<_> = records
            .iter()
            .filter_map(|r| r.fence().map(|f| (r, f)))
            .collect();

        for (i, transition) in geo::transitions(
            fences.iter().map(|(_, f)| f),
            previous.as_ref(),
            &reading.position,
        ) {
            let record = fences[i].0;
            let (kind, message) = match transition {
                Transition::Enter => (
                    AlertKind::Enter,
                    format!("{} arrived at {}", stored.name, record.name),
                ),
                Transition::Exit => (
                    AlertKind::Exit,
                    format!("{} left {}", stored.name, record.name),
                ),
            };
            raised.push(alert::record_with(
                &tx,
                &stored.id,
                Some(&record.id),
                kind,
                &message,
            )?);
        }

        if let Some(level) = reading.battery_level
            && battery_dropped_below(previous_battery, level, self.low_battery_threshold)
        {
            let message = format!("{}'s battery is low ({level:.0}%)", stored.name);
            raised.push(alert::record_with(
                &tx,
                &stored.id,
                None,
                AlertKind::LowBattery,
                &message,
            )?);
        }

        tx.commit()?;

        tracing::debug!(
            child_id = %stored.id,
            position = %reading.position,
            battery = ?reading.battery_level,
            alerts = raised.len(),
            "location updated"
        );

        Ok(raised)
    }
}
