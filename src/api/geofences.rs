//! Geofence management for a parent's children

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};

use super::auth::ApiUser;
use super::error::{ApiError, ApiJson};
use super::ApiState;
use crate::db::{Child, GeofenceRecord, NewGeofence, Role, User};

/// Geofence creation body
#[derive(Debug, Deserialize)]
pub struct GeofenceRequest {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub radius: f64,
}

#[derive(Debug, Serialize)]
pub struct GeofenceSaved {
    pub status: &'static str,
    pub message: &'static str,
    pub geofence: GeofenceRecord,
}

#[derive(Debug, Serialize)]
pub struct GeofenceList {
    pub status: &'static str,
    pub geofences: Vec<GeofenceRecord>,
}

/// Load a child the parent owns; other parents' children look missing
fn own_child(state: &ApiState, parent: &User, child_id: &str) -> Result<Child, ApiError> {
    state
        .children
        .find_for_parent(child_id, &parent.id)?
        .ok_or_else(|| ApiError::not_found("Child not found."))
}

async fn create_geofence(
    State(state): State<Arc<ApiState>>,
    user: ApiUser,
    Path(child_id): Path<String>,
    ApiJson(req): ApiJson<GeofenceRequest>,
) -> Result<Json<GeofenceSaved>, ApiError> {
    let parent = user.require(Role::Parent)?;
    let child = own_child(&state, &parent, &child_id)?;

    let new = NewGeofence::new(&req.name, req.latitude, req.longitude, req.radius)?;
    let geofence = state.geofences.create(&child.id, &new)?;

    Ok(Json(GeofenceSaved {
        status: "success",
        message: "Geofence saved.",
        geofence,
    }))
}

async fn list_geofences(
    State(state): State<Arc<ApiState>>,
    user: ApiUser,
    Path(child_id): Path<String>,
) -> Result<Json<GeofenceList>, ApiError> {
    let parent = user.require(Role::Parent)?;
    let child = own_child(&state, &parent, &child_id)?;

    Ok(Json(GeofenceList {
        status: "success",
        geofences: state.geofences.list_for_child(&child.id)?,
    }))
}

async fn delete_geofence(
    State(state): State<Arc<ApiState>>,
    user: ApiUser,
    Path((child_id, geofence_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let parent = user.require(Role::Parent)?;
    let child = own_child(&state, &parent, &child_id)?;

    if state.geofences.delete(&child.id, &geofence_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("Geofence not found."))
    }
}

/// Build geofence router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/geofence/{child_id}",
            get(list_geofences).post(create_geofence),
        )
        .route(
            "/api/geofence/{child_id}/{geofence_id}",
            delete(delete_geofence),
        )
        .with_state(state)
}
