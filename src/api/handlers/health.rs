//! Health check endpoints

use std::collections::HashMap;

use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::api::middleware::authorize;
use crate::api::server::AppState;

#[derive(Debug, Serialize)]
struct HealthDebugData {
    time: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<DebugUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<DebugIp>,
}

#[derive(Debug, Serialize)]
struct DebugUser {
    name: String,
}

#[derive(Debug, Serialize)]
struct DebugIp {
    machine: String,
    tunnel: HashMap<String, String>,
    exposed: HashMap<String, String>,
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "data": { "status": "ok" }
    }))
}

/// Detailed health report. Identity and egress IPs are only included
/// for authorized callers; anonymous callers still get time and version.
pub async fn health_debug(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> impl IntoResponse {
    let mut report = HealthDebugData {
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        version: env!("CARGO_PKG_VERSION").to_string(),
        user: None,
        ip: None,
    };

    if let Some(creds) = authorize(&state.config.credentials, &headers, query.as_deref(), true) {
        let machine = match state.egress.machine_ip().await {
            Ok(ip) => ip,
            Err(e) => {
                warn!("failed to resolve machine ip: {e}");
                String::new()
            }
        };
        let (ips, err) = state.egress.route_ips().await;
        if let Some(err) = err {
            warn!("egress ip sweep had failures: {err:#}");
        }

        report.user = Some(DebugUser { name: creds.user });
        report.ip = Some(DebugIp {
            machine,
            tunnel: ips.by_endpoint,
            exposed: ips.by_hostname,
        });
    }

    Json(json!({ "data": report }))
}
