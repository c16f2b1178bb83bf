//! User and presence endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use super::{ApiError, ApiResponse, ApiResult};
use crate::api::websocket::state::AppState;
use crate::types::LocationSnapshot;
use crate::utils::hours_ago;

/// Users seen within this window count as recent
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// Response for GET /api/presence
#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    /// Currently registered users
    pub users: Vec<String>,
    /// Live locations of those users
    pub locations: Vec<LocationSnapshot>,
    /// Open WebSocket connections, registered or not
    pub connections: usize,
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    match state.store.get_user(&id).await? {
        Some(user) => Ok(Json(ApiResponse::new(user))),
        None => Err(ApiError::not_found(format!("User '{}' not found", id))),
    }
}

/// GET /api/users/recent - users seen in the last 24 hours
pub async fn recent_users(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let users = state.store.recent_users(hours_ago(RECENT_WINDOW_HOURS)).await?;
    let total = users.len();
    Ok(Json(ApiResponse::with_total(users, total)))
}

/// GET /api/presence - live presence snapshot
pub async fn presence(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tracker = state.gateway.tracker();
    Json(ApiResponse::new(PresenceResponse {
        users: tracker.present_users(),
        locations: tracker.snapshot(),
        connections: state.gateway.router().connection_count(),
    }))
}
