//! Marker endpoints
//!
//! Every committed mutation is announced over the WebSocket to all users
//! except the one who made it. Create and update take either a JSON body or
//! a multipart form whose `attachment` part is stored as a file.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::QueryRejection, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::{ApiError, ApiResponse, ApiResult};
use crate::api::websocket::events::{MarkerRef, ServerEvent};
use crate::api::websocket::state::AppState;
use crate::attachments::Upload;
use crate::types::{MarkerCategory, MarkerUpdate, NewMarker};

/// Minimum description length after trimming
pub const MIN_DESCRIPTION_LEN: usize = 10;

/// Multipart part carrying the attachment file
pub const ATTACHMENT_FIELD: &str = "attachment";

/// Request body for create and update
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerBody {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// User performing the change
    pub user_id: Option<String>,
}

/// Marker fields plus an optional uploaded file
#[derive(Debug, Default)]
pub struct MarkerForm {
    pub body: MarkerBody,
    pub upload: Option<Upload>,
}

#[async_trait]
impl<S> FromRequest<S> for MarkerForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(body) = Json::<MarkerBody>::from_request(req, state).await?;
            return Ok(Self { body, upload: None });
        }

        let mut multipart = Multipart::from_request(req, state).await?;
        let mut form = MarkerForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            if name == ATTACHMENT_FIELD {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await?;
                if file_name.is_some() || !bytes.is_empty() {
                    form.upload = Some(Upload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                continue;
            }

            let value = field.text().await?;
            match name.as_str() {
                "lat" => form.body.lat = Some(number(&value)?),
                "lng" => form.body.lng = Some(number(&value)?),
                "category" => form.body.category = Some(value),
                "description" => form.body.description = Some(value),
                "userId" | "user_id" => form.body.user_id = Some(value),
                _ => {}
            }
        }

        Ok(form)
    }
}

fn number(value: &str) -> Result<f64, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request("Latitude and longitude must be numbers"))
}

/// Query parameters for delete
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    pub user_id: Option<String>,
}

fn coordinates(body: &MarkerBody) -> Result<(f64, f64), ApiError> {
    match (body.lat, body.lng) {
        (Some(lat), Some(lng)) if crate::types::is_valid_coordinate(lat, lng) => Ok((lat, lng)),
        (Some(_), Some(_)) => Err(ApiError::bad_request("Latitude or longitude out of range")),
        _ => Err(ApiError::bad_request("Latitude and longitude are required")),
    }
}

fn category(value: &str) -> Result<MarkerCategory, ApiError> {
    value.parse().map_err(|_| ApiError::bad_request("Invalid category"))
}

fn description(value: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.chars().count() < MIN_DESCRIPTION_LEN {
        return Err(ApiError::bad_request(format!(
            "Description must be at least {} characters",
            MIN_DESCRIPTION_LEN
        )));
    }
    Ok(trimmed.to_string())
}

fn acting_user(user_id: Option<String>) -> Option<String> {
    user_id.filter(|u| !u.trim().is_empty())
}

/// Validate a create request
pub fn validate_new(body: MarkerBody) -> ApiResult<NewMarker> {
    let (lat, lng) = coordinates(&body)?;
    let category = category(body.category.as_deref().unwrap_or_default())?;
    let description = description(body.description.as_deref().unwrap_or_default())?;

    Ok(NewMarker {
        user_id: acting_user(body.user_id),
        lat,
        lng,
        category,
        description,
        attachment: None,
    })
}

/// Validate an update request. Category and description are optional.
pub fn validate_update(body: MarkerBody) -> ApiResult<MarkerUpdate> {
    let (lat, lng) = coordinates(&body)?;
    let category = body.category.as_deref().map(category).transpose()?;
    let description = body.description.as_deref().map(description).transpose()?;

    Ok(MarkerUpdate {
        lat,
        lng,
        category,
        description,
        attachment: None,
    })
}

/// GET /api/markers
pub async fn list_markers(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let markers = state.store.list_markers().await?;
    let total = markers.len();
    Ok(Json(ApiResponse::with_total(markers, total)))
}

/// GET /api/markers/:id
pub async fn get_marker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    match state.store.get_marker(&id).await? {
        Some(marker) => Ok(Json(ApiResponse::new(marker))),
        None => Err(ApiError::not_found(format!("Marker '{}' not found", id))),
    }
}

/// POST /api/markers
pub async fn create_marker(
    State(state): State<Arc<AppState>>,
    form: MarkerForm,
) -> ApiResult<impl IntoResponse> {
    let mut new_marker = validate_new(form.body)?;

    // Validation runs before anything touches the disk.
    if let Some(upload) = &form.upload {
        upload.check()?;
        new_marker.attachment = Some(state.attachments.save(upload).await?);
    }

    let marker = match state.store.create_marker(new_marker.clone()).await {
        Ok(marker) => marker,
        Err(e) => {
            if let Some(url) = &new_marker.attachment {
                state.attachments.remove(url).await;
            }
            return Err(e.into());
        }
    };

    info!(marker_id = %marker.id, user_id = ?marker.user_id, category = %marker.category, attachment = ?marker.attachment, "marker created");
    state
        .gateway
        .notify_others(marker.user_id.as_deref(), ServerEvent::MarkerCreated(marker.clone()));

    Ok((StatusCode::CREATED, Json(ApiResponse::new(marker))))
}

/// PUT /api/markers/:id
///
/// A new attachment replaces the stored one, whose file is then removed.
pub async fn update_marker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    form: MarkerForm,
) -> ApiResult<impl IntoResponse> {
    let acting = acting_user(form.body.user_id.clone());
    let mut update = validate_update(form.body)?;
    if let Some(upload) = &form.upload {
        upload.check()?;
    }

    let Some(current) = state.store.get_marker(&id).await? else {
        return Err(ApiError::not_found(format!("Marker '{}' not found", id)));
    };

    if let Some(upload) = &form.upload {
        update.attachment = Some(state.attachments.save(upload).await?);
    }
    let new_attachment = update.attachment.clone();

    let marker = match state.store.update_marker(&id, update).await {
        Ok(Some(marker)) => marker,
        outcome => {
            if let Some(url) = &new_attachment {
                state.attachments.remove(url).await;
            }
            return match outcome {
                Err(e) => Err(e.into()),
                _ => Err(ApiError::not_found(format!("Marker '{}' not found", id))),
            };
        }
    };

    if let (Some(_), Some(old)) = (&new_attachment, &current.attachment) {
        if Some(old) != marker.attachment.as_ref() {
            state.attachments.remove(old).await;
        }
    }

    info!(marker_id = %marker.id, user_id = ?acting, "marker updated");
    state
        .gateway
        .notify_others(acting.as_deref(), ServerEvent::MarkerUpdated(marker.clone()));

    Ok(Json(ApiResponse::new(marker)))
}

/// DELETE /api/markers/:id
///
/// The acting user is the `userId` query parameter, or the marker's owner.
pub async fn delete_marker(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let Some(marker) = state.store.get_marker(&id).await? else {
        return Err(ApiError::not_found(format!("Marker '{}' not found", id)));
    };

    if !state.store.delete_marker(&id).await? {
        return Err(ApiError::not_found(format!("Marker '{}' not found", id)));
    }

    if let Some(url) = &marker.attachment {
        if !state.attachments.remove(url).await {
            warn!(marker_id = %id, url = %url, "attachment of deleted marker was not removed");
        }
    }

    let acting = acting_user(params.user_id).or(marker.user_id);
    info!(marker_id = %id, user_id = ?acting, "marker deleted");
    state
        .gateway
        .notify_others(acting.as_deref(), ServerEvent::MarkerDeleted(MarkerRef { id: id.clone() }));

    Ok(Json(ApiResponse::new(MarkerRef { id })))
}

/// GET /api/markers/stats
pub async fn marker_stats(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let stats = state.store.marker_stats().await?;
    Ok(Json(ApiResponse::new(stats)))
}
