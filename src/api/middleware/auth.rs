//! Proxy credential extraction
//!
//! Callers present credentials through the gateway's own header, the
//! legacy proxy header, or a `token` query parameter where an endpoint
//! allows it. Values are Basic credentials in plain `user:pass` or
//! base64 form, with or without the `Basic ` prefix.

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::config::CredentialStore;

/// Gateway authorization header; wins over `proxy-authorization`
pub const HEADER_SHROUD_AUTHORIZATION: &str = "x-shroud-authorization";
/// Challenge header paired with [`HEADER_SHROUD_AUTHORIZATION`]
pub const HEADER_SHROUD_AUTHENTICATE: &str = "x-shroud-authenticate";

/// Parsed Basic credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

/// Parse a Basic credential token in plain or base64 form
pub fn parse_basic(token: &str) -> Option<BasicCredentials> {
    let token = token.trim();
    if let Some((user, password)) = token.split_once(':') {
        return Some(BasicCredentials {
            user: user.to_string(),
            password: password.to_string(),
        });
    }
    let decoded = BASE64.decode(token).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.trim().split_once(':')?;
    Some(BasicCredentials {
        user: user.to_string(),
        password: password.to_string(),
    })
}

/// First value of a query parameter, skipping empty values
pub fn query_param(query: &str, name: &str) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query).ok()?;
    pairs
        .into_iter()
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value)
}

fn extract_token(headers: &HeaderMap, query: Option<&str>, read_query: bool) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let token = header_value(HEADER_SHROUD_AUTHORIZATION)
        .or_else(|| header_value(header::PROXY_AUTHORIZATION.as_str()))
        .or_else(|| {
            if read_query {
                query_param(query?, "token")
            } else {
                None
            }
        })?;

    let token = token.trim();
    let token = token.strip_prefix("Basic ").unwrap_or(token).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the caller's credentials, header first, query `token` last
/// where an endpoint allows it. Returns credentials only when the store
/// accepts them.
pub fn authorize(
    store: &CredentialStore,
    headers: &HeaderMap,
    query: Option<&str>,
    read_query: bool,
) -> Option<BasicCredentials> {
    let token = extract_token(headers, query, read_query)?;
    let creds = parse_basic(&token)?;
    if store.is_authorized(&creds.user, &creds.password) {
        Some(creds)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        CredentialStore::parse("alice:secret,bob:hunter2").unwrap()
    }

    #[test]
    fn test_parse_basic_plain_and_base64() {
        let plain = parse_basic("alice:secret").unwrap();
        assert_eq!(plain.user, "alice");
        assert_eq!(plain.password, "secret");

        let encoded = BASE64.encode("alice:secret");
        let decoded = parse_basic(&encoded).unwrap();
        assert_eq!(decoded.user, "alice");
        assert_eq!(decoded.password, "secret");

        assert!(parse_basic("no-colon-and-not-base64!!!").is_none());
        assert!(parse_basic(&BASE64.encode("no-colon")).is_none());
    }

    #[test]
    fn test_authorize_custom_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SHROUD_AUTHORIZATION, "alice:secret".parse().unwrap());
        headers.insert("proxy-authorization", "bob:hunter2".parse().unwrap());

        let creds = authorize(&store(), &headers, None, false).unwrap();
        assert_eq!(creds.user, "alice");
    }

    #[test]
    fn test_authorize_falls_back_to_proxy_header() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-authorization", "Basic bob:hunter2".parse().unwrap());

        let creds = authorize(&store(), &headers, None, false).unwrap();
        assert_eq!(creds.user, "bob");
    }

    #[test]
    fn test_authorize_query_token_only_when_allowed() {
        let headers = HeaderMap::new();
        let query = Some("token=alice:secret");

        assert!(authorize(&store(), &headers, query, false).is_none());

        let creds = authorize(&store(), &headers, query, true).unwrap();
        assert_eq!(creds.user, "alice");
    }

    #[test]
    fn test_authorize_rejects_wrong_password() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SHROUD_AUTHORIZATION, "alice:wrong".parse().unwrap());

        assert!(authorize(&store(), &headers, None, false).is_none());
    }

    #[test]
    fn test_authorize_rejects_unknown_user() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_SHROUD_AUTHORIZATION, "mallory:secret".parse().unwrap());

        assert!(authorize(&store(), &headers, None, false).is_none());
    }
}
