//! Prebuilt outbound HTTP clients, one per tunnel selector

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Proxy};
use url::Url;

use crate::error::{Result, ShroudError};
use crate::tunnel::{RouteTable, TunnelSelector};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-lived outbound clients.
///
/// The streaming clients disable connection reuse and carry no total
/// timeout (the connect phase is bounded, a body copy is not). Probe
/// clients are built fresh per call with a 30 second total timeout.
pub struct TunnelClients {
    direct: Client,
    auto: Client,
    forced: Client,
    routes: Arc<RouteTable>,
}

impl TunnelClients {
    pub fn new(routes: Arc<RouteTable>) -> Result<Self> {
        let direct = streaming_builder().no_proxy().build().map_err(client_error)?;

        let auto_routes = Arc::clone(&routes);
        let auto = streaming_builder()
            .proxy(Proxy::custom(move |target: &Url| {
                auto_routes.resolve_proxy(target, TunnelSelector::Auto)
            }))
            .build()
            .map_err(client_error)?;

        let forced_routes = Arc::clone(&routes);
        let forced = streaming_builder()
            .proxy(Proxy::custom(move |target: &Url| {
                forced_routes.resolve_proxy(target, TunnelSelector::Forced)
            }))
            .build()
            .map_err(client_error)?;

        Ok(Self {
            direct,
            auto,
            forced,
            routes,
        })
    }

    /// The streaming client for a tunnel selector
    pub fn for_selector(&self, selector: TunnelSelector) -> &Client {
        match selector {
            TunnelSelector::None => &self.direct,
            TunnelSelector::Auto => &self.auto,
            TunnelSelector::Forced => &self.forced,
        }
    }

    /// Fresh short-timeout client honoring a tunnel selector
    pub fn probe(&self, selector: TunnelSelector) -> Result<Client> {
        let builder = probe_builder();
        let builder = match selector {
            TunnelSelector::None => builder.no_proxy(),
            TunnelSelector::Auto => {
                let routes = Arc::clone(&self.routes);
                builder.proxy(Proxy::custom(move |target: &Url| {
                    routes.resolve_proxy(target, TunnelSelector::Auto)
                }))
            }
            TunnelSelector::Forced => {
                let routes = Arc::clone(&self.routes);
                builder.proxy(Proxy::custom(move |target: &Url| {
                    routes.resolve_proxy(target, TunnelSelector::Forced)
                }))
            }
        };
        builder.build().map_err(client_error)
    }

    /// Fresh short-timeout client pinned to one proxy endpoint
    pub fn probe_via(endpoint: &Url) -> Result<Client> {
        let proxy = Proxy::all(endpoint.clone()).map_err(|e| {
            ShroudError::Internal(format!("invalid proxy endpoint {endpoint}: {e}"))
        })?;
        probe_builder().proxy(proxy).build().map_err(client_error)
    }
}

fn streaming_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(0)
}

fn probe_builder() -> reqwest::ClientBuilder {
    Client::builder()
        .timeout(PROBE_TIMEOUT)
        .pool_max_idle_per_host(0)
}

fn client_error(e: reqwest::Error) -> ShroudError {
    ShroudError::Internal(format!("failed to build http client: {e}"))
}
