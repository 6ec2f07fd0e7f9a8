//! Family Locator - location sharing between parents and their children
//!
//! Parents and children sign up with separate accounts and link them with a
//! short pairing code. Child devices report their position and battery; the
//! parent sees it on a dashboard and gets alerts when a child enters or
//! leaves a geofence, or when the battery runs low.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     api (axum)                       │
//! │  pages  │  location  │  geofences  │  health  │ auth │
//! └───────┬───────────────────┬─────────────────────────┘
//!         │                   │
//! ┌───────▼────────┐  ┌───────▼────────┐  ┌────────────┐
//! │   security     │  │   tracking     │  │    geo     │
//! │ password/pair  │  │ readings→alerts│──▶ haversine  │
//! └───────┬────────┘  └───────┬────────┘  └────────────┘
//!         │                   │
//! ┌───────▼───────────────────▼─────────────────────────┐
//! │              db (SQLite, r2d2 pool)                  │
//! │  users │ children │ geofences │ alerts │ sessions    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod security;
pub mod tracking;

pub use api::{ApiServer, ApiServerBuilder, ApiState};
pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use geo::{Coordinate, Fence, Transition};
pub use security::{PairingManager, PairingOutcome};
pub use tracking::{LocationReading, LocationTracker};
