//! API server using Axum
//!
//! Builds the shared application state out of the configuration and runs
//! the HTTP surface until shutdown is signalled.

use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::error::{Result, ShroudError};
use crate::forward::StreamForwarder;
use crate::stats::{ConnectionStats, NetworkMonitor};
use crate::token::TokenCodec;
use crate::tunnel::{EgressIpCache, IpChecker, RouteTable, TunnelClients};

use super::handlers::root;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub codec: Arc<TokenCodec>,
    pub forwarder: Arc<StreamForwarder>,
    pub stats: Arc<ConnectionStats>,
    pub egress: Arc<EgressIpCache>,
    pub network: Arc<Mutex<NetworkMonitor>>,
    pub landing_html: String,
}

/// Proxy gateway server
pub struct Server {
    state: AppState,
}

impl Server {
    /// Assemble every component from the configuration
    pub fn new(config: Config) -> Result<Self> {
        let routes = Arc::new(RouteTable::new(&config.tunnel));
        let clients = Arc::new(TunnelClients::new(Arc::clone(&routes))?);
        let checker = IpChecker::from_name(&config.ip_checker)?;
        let egress = Arc::new(EgressIpCache::new(
            checker,
            Arc::clone(&clients),
            Arc::clone(&routes),
        ));

        let stats = Arc::new(ConnectionStats::default());
        let forwarder = Arc::new(StreamForwarder::new(clients, stats.clone()));
        let codec = Arc::new(TokenCodec::new(
            config.credentials.clone(),
            config.jwt_secret.as_deref(),
        ));
        let landing_html = root::render_landing(&config)?;

        Ok(Self {
            state: AppState {
                config,
                codec,
                forwarder,
                stats,
                egress,
                network: Arc::new(Mutex::new(NetworkMonitor::new())),
                landing_html,
            },
        })
    }

    /// Build the router
    pub fn router(&self) -> Router {
        routes::create_router(self.state.clone())
    }

    /// Run the server until shutdown is signalled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.state.config.addr();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("server listening on {}", addr);
        self.log_egress_ips();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| ShroudError::Internal(e.to_string()))?;

        info!("server shut down");
        Ok(())
    }

    /// Resolve and log the egress identities in the background, so a slow
    /// or unreachable IP checker never delays the bind.
    fn log_egress_ips(&self) {
        let egress = Arc::clone(&self.state.egress);
        let tunneled = self.state.config.tunnel.default_endpoint().is_some();
        tokio::spawn(async move {
            match egress.machine_ip().await {
                Ok(ip) => info!("machine ip: {}", ip),
                Err(e) => warn!("failed to resolve machine ip: {}", e),
            }
            if tunneled {
                match egress.tunnel_ip().await {
                    Ok(ip) => info!("tunnel ip: {}", ip),
                    Err(e) => warn!("failed to resolve tunnel ip: {}", e),
                }
            }
        });
    }
}
