//! Request logging middleware

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{debug, info};

/// Request logging middleware
pub struct RequestLogging;

impl RequestLogging {
    /// Log request details against the matched route pattern, so opaque
    /// tokens in the path never reach the logs
    pub async fn log_request(req: Request<Body>, next: Next) -> Response {
        let method = req.method().clone();
        let path = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_owned())
            .unwrap_or_else(|| req.uri().path().to_owned());
        let start = Instant::now();

        debug!("{} {} - started", method, path);

        let response = next.run(req).await;

        let duration = start.elapsed();
        let status = response.status();

        info!(
            "{} {} - {} in {:?}",
            method, path, status, duration
        );

        response
    }
}
