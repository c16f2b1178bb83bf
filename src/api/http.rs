//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::warn;

use super::rest::{markers, samples, users};
use super::websocket::{handler::ws_handler, state::AppState};
use crate::attachments::FILES_ROUTE;
use crate::config::ServerConfig;

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = DefaultBodyLimit::max(state.config.body_limit_bytes);
    // Marker writes may carry an attachment
    let upload_limit = DefaultBodyLimit::max(state.config.upload_limit_bytes);
    let files = ServeDir::new(state.attachments.root());

    Router::new()
        // WebSocket endpoint
        .route("/ws", get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        // Markers
        .route(
            "/api/markers",
            get(markers::list_markers)
                .post(markers::create_marker)
                .layer(upload_limit),
        )
        .route("/api/markers/stats", get(markers::marker_stats))
        .route(
            "/api/markers/:id",
            get(markers::get_marker)
                .put(markers::update_marker)
                .delete(markers::delete_marker)
                .layer(upload_limit),
        )
        // Uploaded attachments
        .nest_service(FILES_ROUTE, files)
        // GPS samples
        .route(
            "/api/samples",
            get(samples::list_samples).post(samples::create_sample),
        )
        .route("/api/samples/range", get(samples::samples_in_range))
        // Users and presence
        .route("/api/users/recent", get(users::recent_users))
        .route("/api/users/:id", get(users::get_user))
        .route("/api/presence", get(users::presence))
        .layer(body_limit)
        .layer(cors)
        .with_state(state)
}

/// CORS configuration from the allowed origin list
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Health check endpoint
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Fleet tracking server is running" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn app() -> Router {
        let state = Arc::new(AppState::new(
            Arc::new(MemoryStore::new()),
            ServerConfig::default(),
        ));
        create_router(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_stats_route_not_shadowed_by_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/markers/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_marker_is_404() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/markers/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "NOT_FOUND");
    }
}
