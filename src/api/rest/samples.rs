//! GPS sample endpoints

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResponse, ApiResult};
use crate::api::websocket::events::{SampleAdded, ServerEvent};
use crate::api::websocket::state::AppState;
use crate::types::{is_valid_coordinate, NewLocationSample};

/// Body of POST /api/samples
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleBody {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub accuracy: Option<f64>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SavedSample {
    pub id: i64,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: Option<f64>,
}

/// Samples returned when `limit` is absent, zero or not a number
pub const DEFAULT_LIMIT: usize = 100;

/// Upper bound on `limit`
pub const MAX_LIMIT: usize = 1000;

/// Query parameters for listing samples
#[derive(Debug, Deserialize)]
pub struct RecentParams {
    /// Maximum number of samples, kept raw so bad values fall back to the default
    pub limit: Option<String>,
}

impl RecentParams {
    pub fn limit(&self) -> usize {
        match self.limit.as_deref().map(str::trim).map(str::parse::<usize>) {
            Some(Ok(0)) | Some(Err(_)) | None => DEFAULT_LIMIT,
            Some(Ok(limit)) => limit.min(MAX_LIMIT),
        }
    }
}

/// Query parameters for the time range endpoint (RFC 3339)
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// POST /api/samples - legacy HTTP ingest, announced to every client
pub async fn create_sample(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SampleBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let (Some(lat), Some(lng)) = (body.lat, body.lng) else {
        return Err(ApiError::bad_request("Latitude and longitude are required"));
    };
    if !is_valid_coordinate(lat, lng) {
        return Err(ApiError::bad_request("Latitude or longitude out of range"));
    }

    let user_id = body.user_id.filter(|u| !u.trim().is_empty());
    let timestamp = Utc::now();
    let id = state
        .store
        .save_location_sample(&NewLocationSample {
            user_id: user_id.clone(),
            lat,
            lng,
            accuracy: body.accuracy,
            timestamp,
        })
        .await?;

    state.gateway.notify_others(
        None,
        ServerEvent::SampleAdded(SampleAdded {
            id: Some(id),
            lat,
            lng,
            accuracy: body.accuracy,
            user_id,
            timestamp,
        }),
    );

    let saved = SavedSample {
        id,
        lat,
        lng,
        accuracy: body.accuracy,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::new(saved))))
}

/// GET /api/samples - latest samples, newest first
pub async fn list_samples(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let samples = state.store.recent_samples(params.limit()).await?;
    Ok(Json(ApiResponse::new(samples)))
}

/// GET /api/samples/range - samples between `from` and `to`, oldest first
pub async fn samples_in_range(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RangeParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let (Some(from), Some(to)) = (params.from, params.to) else {
        return Err(ApiError::bad_request("Both 'from' and 'to' are required"));
    };
    if from > to {
        return Err(ApiError::bad_request("'from' must not be after 'to'"));
    }

    let samples = state.store.samples_between(from, to).await?;
    Ok(Json(ApiResponse::new(samples)))
}
