//! Shroud - Authenticated proxy-link gateway
//!
//! Shroud mints opaque tokens for upstream URLs and streams those URLs
//! back to whoever presents the token, without exposing the upstream
//! address or the gateway's credentials.
//!
//! ## Features
//!
//! - Plain, signed and encrypted link token formats
//! - Per-hostname egress tunnels with suffix matching and no-proxy rules
//! - Streaming relay with connection and byte accounting
//! - Egress IP reporting per tunnel endpoint
//! - Basic-credential auth shared by every surface

pub mod api;
pub mod config;
pub mod error;
pub mod forward;
pub mod stats;
pub mod token;
pub mod tunnel;

pub use config::Config;
pub use error::{Result, ShroudError};
