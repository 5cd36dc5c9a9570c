//! HS256 signing and verification for link tokens

use std::collections::HashSet;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tunnel::TunnelSelector;

/// Issuer claim stamped into every signed link
pub const ISSUER: &str = "shroud";

/// Claims carried by signed link tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkClaims {
    pub iss: String,
    /// Link owner (username)
    pub sub: String,
    /// Expiry as a Unix timestamp; permanent links omit it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    pub data: LinkData,
}

/// The payload-bearing claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkData {
    /// Encoded (or encrypted) link blob
    pub enc_link: String,
    /// Blob format tag: `base64` or the cipher name
    pub enc_format: String,
    #[serde(default, skip_serializing_if = "TunnelSelector::is_none")]
    pub tunt: TunnelSelector,
}

/// Signs and verifies link tokens.
///
/// With no configured secret a random one is generated, which makes signed
/// links die with the process.
pub struct LinkSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl LinkSigner {
    pub fn new(secret: Option<&str>) -> Self {
        let key = match secret {
            Some(s) if !s.is_empty() => s.as_bytes().to_vec(),
            _ => {
                let mut key_bytes = [0u8; 32];
                OsRng.fill_bytes(&mut key_bytes);
                debug!("generated random link token secret");
                key_bytes.to_vec()
            }
        };

        Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
        }
    }

    pub fn sign(&self, claims: &LinkClaims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::default(), claims, &self.encoding_key)
    }

    /// Verify signature, issuer and (when present) expiry with zero leeway
    pub fn verify(&self, token: &str) -> Result<LinkClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 0;
        // exp is optional; permanent links never expire.
        validation.required_spec_claims = HashSet::from(["iss".to_string()]);

        decode::<LinkClaims>(token, &self.decoding_key, &validation).map(|data| data.claims)
    }
}
