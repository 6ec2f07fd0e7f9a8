//! Location reports from child devices

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::post};
use serde::{Deserialize, Serialize};

use super::auth::ApiUser;
use super::error::{ApiError, ApiJson};
use super::ApiState;
use crate::db::{Alert, Role};
use crate::tracking::LocationReading;

/// Location report body
#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub battery_level: Option<f64>,
    /// Must name the logged-in account when present
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Location report result
#[derive(Debug, Serialize)]
pub struct LocationResponse {
    pub status: &'static str,
    pub alerts: Vec<Alert>,
}

/// Store a child's position and battery
async fn update_location(
    State(state): State<Arc<ApiState>>,
    user: ApiUser,
    ApiJson(req): ApiJson<LocationRequest>,
) -> Result<Json<LocationResponse>, ApiError> {
    let user = user.require(Role::Child)?;

    if req.user_id.as_deref().is_some_and(|id| id != user.id) {
        tracing::warn!(user_id = %user.id, "location report for another account");
        return Err(ApiError::forbidden());
    }

    let reading = LocationReading::new(req.latitude, req.longitude, req.battery_level)?;

    let child = state
        .children
        .find_by_user(&user.id)?
        .ok_or_else(|| ApiError::not_found("Child instance not found."))?;

    let alerts = state.tracker.record(&child, &reading)?;

    Ok(Json(LocationResponse {
        status: "success",
        alerts,
    }))
}

/// Build location router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/location", post(update_location))
        .with_state(state)
}
