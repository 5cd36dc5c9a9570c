//! Proxy link creation and access handlers

use std::collections::HashMap;

use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::api::middleware::{authorize, HEADER_SHROUD_AUTHENTICATE};
use crate::api::server::AppState;
use crate::error::ShroudError;
use crate::token::LinkRequest;
use crate::tunnel::TunnelSelector;

/// Request parameters split by where they arrived. Multi-value keys are
/// read from the query on GET and from the body on POST; scalar keys see
/// the query first.
struct FormParams {
    query: Vec<(String, String)>,
    body: Vec<(String, String)>,
}

impl FormParams {
    fn parse(
        method: &Method,
        query: Option<&str>,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<Self, ShroudError> {
        let query = serde_urlencoded::from_str(query.unwrap_or(""))
            .map_err(|_| ShroudError::BadRequest("failed to parse data".into()))?;
        let body = if *method == Method::POST && is_form_content_type(headers) {
            serde_urlencoded::from_bytes(body)
                .map_err(|_| ShroudError::BadRequest("failed to parse data".into()))?
        } else {
            Vec::new()
        };
        Ok(Self { query, body })
    }

    /// First value for a key, query before body
    fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .chain(&self.body)
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn has_query(&self, key: &str) -> bool {
        self.query.iter().any(|(k, _)| k == key)
    }

    fn query_values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn body_values(&self, key: &str) -> Vec<&str> {
        self.body
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

fn is_form_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

/// Newline-separated `Key: Value` lines into a header map
fn parse_header_blob(blob: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in blob.split('\n') {
        if let Some((key, value)) = line.split_once(": ") {
            headers.insert(key.to_string(), value.to_string());
        }
    }
    headers
}

/// `exp` values are duration strings like `12h30m`; a bare trailing
/// digit means seconds. Zero disables expiry.
fn parse_expiry(raw: Option<&str>) -> Result<Option<std::time::Duration>, ShroudError> {
    let Some(raw) = raw.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let normalized = if raw.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{raw}s")
    } else {
        raw.to_string()
    };
    let duration = humantime::parse_duration(&normalized)
        .map_err(|_| ShroudError::BadRequest("invalid expiration".into()))?;
    Ok((!duration.is_zero()).then_some(duration))
}

fn materialize_link(base_url: &Url, token: &str, filename: &str) -> String {
    let mut link = base_url.to_string();
    if !link.ends_with('/') {
        link.push('/');
    }
    link.push_str("v0/proxy/");
    link.push_str(token);
    if !filename.is_empty() {
        link.push('/');
        link.push_str(filename);
    }
    link
}

/// Create proxy links for one or more target URLs.
///
/// GET reads targets from the query and can answer with a redirect;
/// POST reads them from an urlencoded body. Tokens are encrypted unless
/// the caller authenticated through the `token` query parameter, so the
/// link stays usable by whoever was handed the plain credential.
pub async fn create_links(
    State(state): State<AppState>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, ShroudError> {
    let Some(creds) = authorize(&state.config.credentials, &headers, query.as_deref(), true) else {
        let mut response = ShroudError::Forbidden.into_response();
        response
            .headers_mut()
            .insert(HEADER_SHROUD_AUTHENTICATE, HeaderValue::from_static("Basic"));
        return Ok(response);
    };

    let params = FormParams::parse(&method, query.as_deref(), &headers, &body)?;

    let urls = if method == Method::GET {
        params.query_values("url")
    } else {
        params.body_values("url")
    };
    if urls.is_empty() {
        return Err(ShroudError::BadRequest("missing url".into()));
    }

    let redirect = method == Method::GET && params.get("redirect").is_some_and(|v| !v.is_empty());
    if redirect && urls.len() > 1 {
        return Err(ShroudError::BadRequest(
            "can not redirect for multiple urls".into(),
        ));
    }

    let expires_in = parse_expiry(params.get("exp"))?;
    let encrypt = !params.has_query("token");
    let fallback_blob = params.get("req_headers").unwrap_or("");

    let mut headers_by_blob: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut links = Vec::with_capacity(urls.len());
    for (index, url) in urls.iter().enumerate() {
        let target = Url::parse(url)
            .map_err(|_| ShroudError::BadRequest(format!("invalid url at index {index}")))?;

        let blob = params
            .get(&format!("req_headers[{index}]"))
            .filter(|b| !b.is_empty())
            .unwrap_or(fallback_blob);
        let link_headers = headers_by_blob
            .entry(blob.to_string())
            .or_insert_with(|| parse_header_blob(blob));

        let token = state.codec.encode(&LinkRequest {
            user: &creds.user,
            target: &target,
            headers: link_headers,
            tunnel: TunnelSelector::Auto,
            encrypt,
            expires_in,
        })?;

        let filename = params
            .get(&format!("filename[{index}]"))
            .unwrap_or_default();
        links.push(materialize_link(&state.config.server.base_url, &token, filename));
    }

    if redirect {
        let location = HeaderValue::try_from(links[0].as_str())
            .map_err(|_| ShroudError::Internal("redirect location is not a valid header".into()))?;
        let response = Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, location)
            .body(Body::empty())
            .map_err(|e| ShroudError::Internal(format!("failed to build response: {e}")))?;
        return Ok(response);
    }

    info!(user = %creds.user, count = links.len(), "created proxy links");

    let total_items = links.len();
    Ok(Json(json!({
        "data": { "items": links, "total_items": total_items }
    }))
    .into_response())
}

/// Stream the target behind a proxy link token.
///
/// The trailing filename segment is cosmetic; only the token matters.
/// Inbound headers are forwarded with the link's stored headers layered
/// on top.
pub async fn access_link(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response<Body>, ShroudError> {
    let token = path.get("token").map(String::as_str).unwrap_or("");
    if token.is_empty() {
        return Err(ShroudError::BadRequest("missing token".into()));
    }

    let link = state.codec.decode(token)?;

    let mut outbound = headers.clone();
    for (key, value) in &link.headers {
        match (
            HeaderName::try_from(key.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                outbound.insert(name, value);
            }
            _ => debug!(header = %key, "dropping unrepresentable link header"),
        }
    }

    state
        .forwarder
        .forward(method, &outbound, &link.target, link.tunnel, &link.user)
        .await
}
