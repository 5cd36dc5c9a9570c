//! Connection and throughput statistics endpoint

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::api::middleware::authorize;
use crate::api::server::AppState;
use crate::error::ShroudError;

#[derive(Debug, Serialize)]
struct StatsData {
    active_connections: i64,
    total_bytes_proxied: u64,
    system_network: SystemNetworkStats,
}

#[derive(Debug, Serialize)]
struct SystemNetworkStats {
    bytes_received_per_second: u64,
    bytes_sent_per_second: u64,
    total_bytes_per_second: u64,
}

/// Live proxy counters and host network throughput
pub async fn stats(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ShroudError> {
    if authorize(&state.config.credentials, &headers, query.as_deref(), true).is_none() {
        let mut response = ShroudError::Forbidden.into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
        return Ok(response);
    }

    let throughput = state.network.lock().sample();
    let data = StatsData {
        active_connections: state.stats.active_connections(),
        total_bytes_proxied: state.stats.total_bytes(),
        system_network: SystemNetworkStats {
            bytes_received_per_second: throughput.received_per_sec,
            bytes_sent_per_second: throughput.transmitted_per_sec,
            total_bytes_per_second: throughput.received_per_sec + throughput.transmitted_per_sec,
        },
    };

    Ok(Json(json!({ "data": data })).into_response())
}
