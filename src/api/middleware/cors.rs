//! CORS configuration for the proxy surface

use axum::http::Method;
use tower_http::cors::{Any, CorsLayer};

/// Wide-open CORS; proxy links are meant to be fetched from any origin
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
}
