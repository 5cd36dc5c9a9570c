//! API route definitions

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::json;

use super::handlers;
use super::middleware::{cors_layer, RequestLogging};
use super::server::AppState;
use crate::error::ShroudError;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    // The proxy surface is the part browsers and media players hit
    // cross-origin, so CORS is scoped to it.
    let proxy = Router::new()
        .route(
            "/v0/proxy",
            get(handlers::proxy::create_links)
                .post(handlers::proxy::create_links)
                .fallback(method_not_allowed),
        )
        .route(
            "/v0/proxy/:token",
            get(handlers::proxy::access_link).fallback(method_not_allowed),
        )
        .route(
            "/v0/proxy/:token/:filename",
            get(handlers::proxy::access_link).fallback(method_not_allowed),
        )
        .layer(cors_layer());

    Router::new()
        .route("/", get(handlers::root::landing).fallback(method_not_allowed))
        .route(
            "/v0/stats",
            get(handlers::stats::stats).fallback(method_not_allowed),
        )
        .route(
            "/v0/health",
            get(handlers::health::health).fallback(method_not_allowed),
        )
        .route(
            "/v0/health/__debug__",
            get(handlers::health::health_debug).fallback(method_not_allowed),
        )
        .merge(proxy)
        .fallback(not_found)
        .layer(middleware::from_fn(RequestLogging::log_request))
        .with_state(state)
}

async fn method_not_allowed() -> ShroudError {
    ShroudError::MethodNotAllowed
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": { "message": "not found", "status_code": 404 }
        })),
    )
}
