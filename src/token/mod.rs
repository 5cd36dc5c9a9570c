//! Proxy link tokens
//!
//! A link token is one of three formats:
//! - plain: tag-prefixed base64 JSON with the credential pair inline;
//!   permanent, re-validated against the live credential store on decode
//! - signed: HS256 JWT whose data claim carries the base64 link blob,
//!   with an optional expiry
//! - signed+encrypted: the same JWT, blob encrypted under a key derived
//!   from the owner's password
//!
//! Every decode failure collapses to Unauthorized; causes are logged
//! server-side only.

pub mod crypto;
pub mod jwt;

pub use jwt::LinkSigner;

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::CredentialStore;
use crate::error::{Result, ShroudError};
use crate::token::jwt::{LinkClaims, LinkData, ISSUER};
use crate::tunnel::TunnelSelector;

/// Format tag prefixing plain tokens
pub const PLAIN_PREFIX: &str = "base64.";

const BLOB_FORMAT_PLAIN: &str = "base64";
const BLOB_FORMAT_ENCRYPTED: &str = "aes-256-gcm";

const DECODE_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const DECODE_CACHE_CAPACITY: u64 = 16 * 1024;

/// Decoded proxy link payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLink {
    /// Owning user
    pub user: String,
    /// Upstream target
    pub target: Url,
    /// Headers to set on the outbound request
    pub headers: HashMap<String, String>,
    /// Network path for the fetch
    pub tunnel: TunnelSelector,
}

/// Everything needed to mint one link token
pub struct LinkRequest<'a> {
    pub user: &'a str,
    pub target: &'a Url,
    pub headers: &'a HashMap<String, String>,
    pub tunnel: TunnelSelector,
    pub encrypt: bool,
    pub expires_in: Option<Duration>,
}

/// Wire shape of the plain format
#[derive(Serialize, Deserialize)]
struct PlainPayload {
    /// `user:password`
    u: String,
    /// Target URL
    v: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    reqh: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "TunnelSelector::is_none")]
    tunt: TunnelSelector,
}

/// Encodes and decodes link tokens, caching successful decodes.
///
/// Cache hits skip signature and expiry re-validation for the cache TTL;
/// that lag is accepted in exchange for cheap repeated access.
pub struct TokenCodec {
    credentials: CredentialStore,
    signer: LinkSigner,
    cache: moka::sync::Cache<String, ProxyLink>,
}

impl TokenCodec {
    pub fn new(credentials: CredentialStore, secret: Option<&str>) -> Self {
        Self {
            credentials,
            signer: LinkSigner::new(secret),
            cache: moka::sync::Cache::builder()
                .max_capacity(DECODE_CACHE_CAPACITY)
                .time_to_live(DECODE_CACHE_TTL)
                .build(),
        }
    }

    /// Mint a token for a link.
    ///
    /// Plain is only used for permanent unencrypted links; asking for an
    /// expiry upgrades the token to the signed format, since plain cannot
    /// carry one.
    pub fn encode(&self, req: &LinkRequest<'_>) -> Result<String> {
        if !req.encrypt && req.expires_in.is_none() {
            return self.encode_plain(req);
        }
        self.encode_signed(req)
    }

    /// Decode a token back into its payload.
    ///
    /// Consults the decode cache first; any failure maps to Unauthorized
    /// with the cause logged at debug level.
    pub fn decode(&self, token: &str) -> Result<ProxyLink> {
        if let Some(link) = self.cache.get(token) {
            return Ok(link);
        }

        let link = match token.strip_prefix(PLAIN_PREFIX) {
            Some(encoded) => self.decode_plain(encoded)?,
            None => self.decode_signed(token)?,
        };

        self.cache.insert(token.to_string(), link.clone());
        Ok(link)
    }

    fn encode_plain(&self, req: &LinkRequest<'_>) -> Result<String> {
        let password = self.owner_password(req.user)?;
        let payload = PlainPayload {
            u: format!("{}:{}", req.user, password),
            v: req.target.to_string(),
            reqh: req.headers.clone(),
            tunt: req.tunnel,
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| ShroudError::Internal(format!("failed to serialize link: {e}")))?;
        Ok(format!("{PLAIN_PREFIX}{}", BASE64_URL.encode(json)))
    }

    fn encode_signed(&self, req: &LinkRequest<'_>) -> Result<String> {
        let blob = blob_serialize(req.target, req.headers);

        let (enc_link, enc_format) = if req.encrypt {
            let password = self.owner_password(req.user)?;
            let encrypted = crypto::encrypt(password, &blob)
                .map_err(|e| ShroudError::Internal(format!("failed to encrypt link: {e}")))?;
            (encrypted, BLOB_FORMAT_ENCRYPTED)
        } else {
            (BASE64.encode(blob.as_bytes()), BLOB_FORMAT_PLAIN)
        };

        let claims = LinkClaims {
            iss: ISSUER.to_string(),
            sub: req.user.to_string(),
            exp: req
                .expires_in
                .map(|d| jsonwebtoken::get_current_timestamp() + d.as_secs()),
            data: LinkData {
                enc_link,
                enc_format: enc_format.to_string(),
                tunt: req.tunnel,
            },
        };

        self.signer
            .sign(&claims)
            .map_err(|e| ShroudError::Internal(format!("failed to sign link: {e}")))
    }

    fn decode_plain(&self, encoded: &str) -> Result<ProxyLink> {
        let json = BASE64_URL
            .decode(encoded)
            .map_err(|e| unauthorized("plain base64", e))?;
        let payload: PlainPayload =
            serde_json::from_slice(&json).map_err(|e| unauthorized("plain json", e))?;

        let (user, password) = payload
            .u
            .split_once(':')
            .ok_or_else(|| unauthorized("plain credential", "missing separator"))?;
        if !self.credentials.is_authorized(user, password) {
            return Err(unauthorized("plain credential", "no longer valid"));
        }

        let target = Url::parse(&payload.v).map_err(|e| unauthorized("plain target", e))?;

        Ok(ProxyLink {
            user: user.to_string(),
            target,
            headers: payload.reqh,
            tunnel: payload.tunt,
        })
    }

    fn decode_signed(&self, token: &str) -> Result<ProxyLink> {
        let claims = self
            .signer
            .verify(token)
            .map_err(|e| unauthorized("signature", e))?;

        let blob = if claims.data.enc_format == BLOB_FORMAT_PLAIN {
            let bytes = BASE64
                .decode(&claims.data.enc_link)
                .map_err(|e| unauthorized("blob base64", e))?;
            String::from_utf8(bytes).map_err(|e| unauthorized("blob utf8", e))?
        } else {
            // Any other format tag means the blob is encrypted. The key
            // comes from the live store, so a removed user cannot decrypt.
            let password = self
                .credentials
                .password(&claims.sub)
                .ok_or_else(|| unauthorized("blob key", "unknown user"))?;
            crypto::decrypt(password, &claims.data.enc_link)
                .map_err(|e| unauthorized("blob decrypt", e))?
        };

        let (target, headers) = blob_parse(&blob)?;

        Ok(ProxyLink {
            user: claims.sub,
            target,
            headers,
            tunnel: claims.data.tunt,
        })
    }

    fn owner_password(&self, user: &str) -> Result<&str> {
        self.credentials
            .password(user)
            .ok_or(ShroudError::Unauthorized)
    }
}

fn unauthorized(stage: &str, cause: impl Display) -> ShroudError {
    debug!("token decode failed ({stage}): {cause}");
    ShroudError::Unauthorized
}

/// Blob layout: target URL on the first line, then one `Key: Value` per line
fn blob_serialize(target: &Url, headers: &HashMap<String, String>) -> String {
    let mut blob = target.to_string();
    for (key, value) in headers {
        blob.push('\n');
        blob.push_str(key);
        blob.push_str(": ");
        blob.push_str(value);
    }
    blob
}

fn blob_parse(blob: &str) -> Result<(Url, HashMap<String, String>)> {
    let mut lines = blob.lines();
    let first = lines
        .next()
        .ok_or_else(|| unauthorized("blob", "empty payload"))?;
    let target = Url::parse(first).map_err(|e| unauthorized("blob target", e))?;

    let mut headers = HashMap::new();
    for line in lines {
        // Lines without a `: ` separator are dropped, not rejected.
        if let Some((key, value)) = line.split_once(": ") {
            headers.insert(key.to_string(), value.to_string());
        }
    }

    Ok((target, headers))
}
