//! Outbound tunnel routing
//!
//! This module decides how upstream fetches leave the machine:
//! - Per-hostname route table with parent-domain fallback
//! - Ambient environment proxy with no-proxy exclusions
//! - Prebuilt outbound clients per tunnel selector
//! - Egress IP resolution and caching per route

pub mod clients;
pub mod egress;
pub mod routes;

pub use clients::TunnelClients;
pub use egress::{EgressIpCache, EgressIpReport, IpChecker};
pub use routes::{RouteDecision, RouteTable};

use serde::{Deserialize, Serialize};

/// Which network path an outbound fetch takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TunnelSelector {
    /// Always connect directly
    #[default]
    #[serde(rename = "")]
    None,
    /// Consult the route table, falling back to the ambient proxy
    #[serde(rename = "a")]
    Auto,
    /// Always use the wildcard route
    #[serde(rename = "f")]
    Forced,
}

impl TunnelSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelSelector::None => "none",
            TunnelSelector::Auto => "auto",
            TunnelSelector::Forced => "forced",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TunnelSelector::None)
    }
}

impl std::fmt::Display for TunnelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
