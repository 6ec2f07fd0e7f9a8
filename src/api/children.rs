//! Parent overview endpoints: children and alerts

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::ApiUser;
use super::error::{ApiError, ApiQuery};
use super::ApiState;
use crate::db::{Alert, Child, GeofenceRecord, Role};
use crate::geo::Coordinate;

/// Default and maximum number of alerts returned
const DEFAULT_ALERT_LIMIT: usize = 50;
const MAX_ALERT_LIMIT: usize = 500;

/// A child as seen by its parent
#[derive(Debug, Serialize)]
pub struct ChildSummary {
    pub id: String,
    pub name: String,
    pub paired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub battery_level: Option<f64>,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Names of the geofences containing the last known position
    pub inside: Vec<String>,
}

/// Names of the fences that contain a position
#[must_use]
pub fn fences_containing(fences: &[GeofenceRecord], position: Option<&Coordinate>) -> Vec<String> {
    let Some(position) = position else {
        return Vec::new();
    };

    fences
        .iter()
        .filter(|g| g.fence().is_some_and(|f| f.contains(position)))
        .map(|g| g.name.clone())
        .collect()
}

impl ChildSummary {
    fn new(child: Child, fences: &[GeofenceRecord]) -> Self {
        let inside = fences_containing(fences, child.position().as_ref());
        Self {
            paired: child.is_fully_paired(),
            id: child.id,
            name: child.name,
            pairing_code: child.pairing_code,
            latitude: child.latitude,
            longitude: child.longitude,
            battery_level: child.battery_level,
            last_seen_at: child.last_seen_at,
            inside,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChildrenResponse {
    pub status: &'static str,
    pub children: Vec<ChildSummary>,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub status: &'static str,
    pub unacknowledged: usize,
    pub alerts: Vec<Alert>,
}

async fn list_children(
    State(state): State<Arc<ApiState>>,
    user: ApiUser,
) -> Result<Json<ChildrenResponse>, ApiError> {
    let parent = user.require(Role::Parent)?;

    let mut children = Vec::new();
    for child in state.children.list_for_parent(&parent.id)? {
        let fences = state.geofences.list_for_child(&child.id)?;
        children.push(ChildSummary::new(child, &fences));
    }

    Ok(Json(ChildrenResponse {
        status: "success",
        children,
    }))
}

async fn list_alerts(
    State(state): State<Arc<ApiState>>,
    user: ApiUser,
    ApiQuery(query): ApiQuery<AlertQuery>,
) -> Result<Json<AlertsResponse>, ApiError> {
    let parent = user.require(Role::Parent)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ALERT_LIMIT)
        .clamp(1, MAX_ALERT_LIMIT);

    Ok(Json(AlertsResponse {
        status: "success",
        unacknowledged: state.alerts.count_unacknowledged(&parent.id)?,
        alerts: state.alerts.list_for_parent(&parent.id, limit)?,
    }))
}

/// Build parent overview router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/children", get(list_children))
        .route("/api/alerts", get(list_alerts))
        .with_state(state)
}
