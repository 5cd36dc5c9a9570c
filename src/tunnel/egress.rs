//! Egress IP resolution and caching
//!
//! Answers "what external IP does this route exit from": the machine's own
//! IP is resolved once and memoized forever, per-route IPs are refreshed at
//! most every 30 minutes, and per-endpoint failures never abort a sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use url::Url;

use crate::error::{Result, ShroudError};
use crate::tunnel::{RouteTable, TunnelClients, TunnelSelector};

const ROUTE_IP_STALENESS: Duration = Duration::from_secs(30 * 60);

/// External IP checking service
#[derive(Debug, Clone)]
pub struct IpChecker {
    endpoint: String,
}

impl IpChecker {
    pub fn from_name(name: &str) -> Result<Self> {
        let endpoint = match name {
            "aws" | "amazon" => "https://checkip.amazonaws.com",
            "akamai" => "https://whatismyip.akamai.com",
            other => {
                return Err(ShroudError::InvalidConfig(format!(
                    "unknown ip checker: {other:?}"
                )))
            }
        };
        Ok(Self {
            endpoint: endpoint.to_string(),
        })
    }

    /// Checker with an explicit endpoint URL
    pub fn custom(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    async fn fetch(&self, client: &reqwest::Client) -> anyhow::Result<String> {
        let response = client
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("GET {}", self.endpoint))?
            .error_for_status()?;
        let body = response.text().await?;
        let ip = body.trim().to_string();
        if ip.is_empty() {
            bail!("empty response from {}", self.endpoint);
        }
        Ok(ip)
    }
}

/// Egress IPs keyed two ways: by proxy endpoint and by route hostname
#[derive(Debug, Clone, Default)]
pub struct EgressIpReport {
    /// `host[:port]` of each distinct endpoint → IP (empty string on failure)
    pub by_endpoint: HashMap<String, String>,
    /// Route hostname → IP; direct routes carry the machine IP
    pub by_hostname: HashMap<String, String>,
}

#[derive(Default)]
struct RouteIpState {
    report: EgressIpReport,
    stale_at: Option<Instant>,
}

pub struct EgressIpCache {
    checker: IpChecker,
    clients: Arc<TunnelClients>,
    routes: Arc<RouteTable>,
    machine_ip: OnceCell<String>,
    state: Mutex<RouteIpState>,
}

impl EgressIpCache {
    pub fn new(checker: IpChecker, clients: Arc<TunnelClients>, routes: Arc<RouteTable>) -> Self {
        Self {
            checker,
            clients,
            routes,
            machine_ip: OnceCell::new(),
            state: Mutex::new(RouteIpState::default()),
        }
    }

    /// The machine's own external IP. First successful resolution wins
    /// and is kept for the lifetime of the process.
    pub async fn machine_ip(&self) -> Result<String> {
        let ip = self
            .machine_ip
            .get_or_try_init(|| async {
                let client = self.clients.probe(TunnelSelector::None)?;
                self.checker.fetch(&client).await.map_err(|e| {
                    ShroudError::Internal(format!("failed to resolve machine ip: {e:#}"))
                })
            })
            .await?;
        Ok(ip.clone())
    }

    /// The external IP as seen through the forced tunnel. Probed live on
    /// every call; with no default proxy configured this equals the
    /// machine IP.
    pub async fn tunnel_ip(&self) -> Result<String> {
        let client = self.clients.probe(TunnelSelector::Forced)?;
        self.checker
            .fetch(&client)
            .await
            .map_err(|e| ShroudError::Internal(format!("failed to resolve tunnel ip: {e:#}")))
    }

    /// Egress IPs for every route in the table.
    ///
    /// Distinct endpoints are probed once each; a sweep is reused until it
    /// goes stale. Failures map the endpoint to an empty IP and come back
    /// joined into a single error next to the (still usable) report.
    pub async fn route_ips(&self) -> (EgressIpReport, Option<anyhow::Error>) {
        let mut state = self.state.lock().await;
        if let Some(stale_at) = state.stale_at {
            if Instant::now() < stale_at {
                return (state.report.clone(), None);
            }
        }

        let mut report = EgressIpReport::default();
        let mut errors: Vec<anyhow::Error> = Vec::new();

        let mut direct_hosts: Vec<String> = Vec::new();
        let mut endpoints: Vec<(String, Url, Vec<String>)> = Vec::new();
        for (hostname, endpoint) in self.routes.entries() {
            match endpoint {
                None => direct_hosts.push(hostname),
                Some(url) => {
                    let key = endpoint_key(&url);
                    match endpoints.iter_mut().find(|(k, _, _)| *k == key) {
                        Some((_, _, hosts)) => hosts.push(hostname),
                        None => endpoints.push((key, url, vec![hostname])),
                    }
                }
            }
        }

        if !direct_hosts.is_empty() {
            let ip = match self.machine_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    errors.push(anyhow::Error::new(e).context("machine ip"));
                    String::new()
                }
            };
            for hostname in direct_hosts {
                report.by_hostname.insert(hostname, ip.clone());
            }
        }

        for (key, endpoint, hostnames) in endpoints {
            let ip = match self.probe_endpoint(&endpoint).await {
                Ok(ip) => ip,
                Err(e) => {
                    errors.push(e.context(format!("via {key}")));
                    String::new()
                }
            };
            debug!(endpoint = %key, ip = %ip, "resolved route egress ip");
            report.by_endpoint.insert(key, ip.clone());
            for hostname in hostnames {
                report.by_hostname.insert(hostname, ip.clone());
            }
        }

        state.report = report.clone();
        state.stale_at = Some(Instant::now() + ROUTE_IP_STALENESS);

        (report, join_errors(errors))
    }

    async fn probe_endpoint(&self, endpoint: &Url) -> anyhow::Result<String> {
        let client = TunnelClients::probe_via(endpoint)?;
        self.checker.fetch(&client).await
    }
}

fn endpoint_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn join_errors(errors: Vec<anyhow::Error>) -> Option<anyhow::Error> {
    if errors.is_empty() {
        return None;
    }
    let joined = errors
        .iter()
        .map(|e| format!("{e:#}"))
        .collect::<Vec<_>>()
        .join("; ");
    Some(anyhow!(joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use crate::config::{RouteDirective, TunnelConfig};

    /// Plain HTTP server answering every request with `body`.
    async fn spawn_http_server(body: &'static str, hits: Arc<AtomicUsize>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{addr}")
    }

    fn build_cache(checker_url: &str, routes: Vec<(&str, RouteDirective)>) -> EgressIpCache {
        let cfg = TunnelConfig {
            http_proxy: None,
            https_proxy: None,
            routes: routes
                .into_iter()
                .map(|(h, d)| (h.to_string(), d))
                .collect(),
            no_proxy: None,
        };
        let table = Arc::new(RouteTable::new(&cfg));
        let clients = Arc::new(TunnelClients::new(Arc::clone(&table)).unwrap());
        EgressIpCache::new(IpChecker::custom(checker_url), clients, table)
    }

    #[tokio::test]
    async fn test_machine_ip_is_memoized() {
        let hits = Arc::new(AtomicUsize::new(0));
        let checker_url = spawn_http_server("9.9.9.9", Arc::clone(&hits)).await;
        let cache = build_cache(&checker_url, vec![]);

        let first = cache.machine_ip().await.unwrap();
        let second = cache.machine_ip().await.unwrap();

        assert_eq!(first, "9.9.9.9");
        assert_eq!(second, "9.9.9.9");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tunnel_ip_probes_live_through_wildcard_endpoint() {
        let checker_hits = Arc::new(AtomicUsize::new(0));
        let checker_url = spawn_http_server("9.9.9.9", Arc::clone(&checker_hits)).await;

        let proxy_hits = Arc::new(AtomicUsize::new(0));
        let proxy_url = spawn_http_server("7.7.7.7", Arc::clone(&proxy_hits)).await;

        let cfg = TunnelConfig {
            http_proxy: Some(Url::parse(&proxy_url).unwrap()),
            https_proxy: None,
            routes: vec![],
            no_proxy: None,
        };
        let table = Arc::new(RouteTable::new(&cfg));
        let clients = Arc::new(TunnelClients::new(Arc::clone(&table)).unwrap());
        let cache = EgressIpCache::new(IpChecker::custom(&checker_url), clients, table);

        // Unlike the machine IP, every call goes out again.
        assert_eq!(cache.tunnel_ip().await.unwrap(), "7.7.7.7");
        assert_eq!(cache.tunnel_ip().await.unwrap(), "7.7.7.7");
        assert_eq!(proxy_hits.load(Ordering::SeqCst), 2);
        assert_eq!(checker_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_route_ips_probes_each_endpoint_once_and_caches() {
        let checker_hits = Arc::new(AtomicUsize::new(0));
        let checker_url = spawn_http_server("9.9.9.9", Arc::clone(&checker_hits)).await;

        // One endpoint shared by two hostnames; the fake proxy answers the
        // absolute-form probe itself, so the checker sees no proxied hits.
        let proxy_hits = Arc::new(AtomicUsize::new(0));
        let proxy_url = spawn_http_server("7.7.7.7", Arc::clone(&proxy_hits)).await;
        let endpoint = Url::parse(&proxy_url).unwrap();

        let cache = build_cache(
            &checker_url,
            vec![
                ("a.example", RouteDirective::Endpoint(endpoint.clone())),
                ("b.example", RouteDirective::Endpoint(endpoint.clone())),
            ],
        );

        let (report, err) = timeout(Duration::from_secs(10), cache.route_ips())
            .await
            .unwrap();
        assert!(err.is_none(), "unexpected error: {err:?}");

        let key = endpoint_key(&endpoint);
        assert_eq!(report.by_endpoint.get(&key).map(String::as_str), Some("7.7.7.7"));
        assert_eq!(
            report.by_hostname.get("a.example").map(String::as_str),
            Some("7.7.7.7")
        );
        assert_eq!(
            report.by_hostname.get("b.example").map(String::as_str),
            Some("7.7.7.7")
        );
        // Wildcard entry is direct, so it carries the machine IP.
        assert_eq!(
            report.by_hostname.get("*").map(String::as_str),
            Some("9.9.9.9")
        );
        assert_eq!(proxy_hits.load(Ordering::SeqCst), 1);

        // A second sweep inside the staleness window is served from cache.
        let (cached, err) = timeout(Duration::from_secs(10), cache.route_ips())
            .await
            .unwrap();
        assert!(err.is_none());
        assert_eq!(cached.by_endpoint, report.by_endpoint);
        assert_eq!(proxy_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_route_ips_joins_failures_without_aborting() {
        let checker_hits = Arc::new(AtomicUsize::new(0));
        let checker_url = spawn_http_server("9.9.9.9", Arc::clone(&checker_hits)).await;

        // Grab a port that nothing listens on.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap();
        drop(dead);
        let dead_endpoint = Url::parse(&format!("http://{dead_addr}")).unwrap();

        let cache = build_cache(
            &checker_url,
            vec![("x.example", RouteDirective::Endpoint(dead_endpoint.clone()))],
        );

        let (report, err) = timeout(Duration::from_secs(10), cache.route_ips())
            .await
            .unwrap();

        let key = endpoint_key(&dead_endpoint);
        assert_eq!(report.by_endpoint.get(&key).map(String::as_str), Some(""));
        assert_eq!(
            report.by_hostname.get("x.example").map(String::as_str),
            Some("")
        );
        assert_eq!(
            report.by_hostname.get("*").map(String::as_str),
            Some("9.9.9.9")
        );

        let err = err.expect("probe failure must surface");
        assert!(err.to_string().contains(&key), "error should name the endpoint: {err}");
    }

    #[test]
    fn test_ip_checker_providers() {
        assert!(IpChecker::from_name("aws").is_ok());
        assert!(IpChecker::from_name("amazon").is_ok());
        assert!(IpChecker::from_name("akamai").is_ok());
        assert!(IpChecker::from_name("cloudflare").is_err());
    }

    #[test]
    fn test_endpoint_key_includes_explicit_port_only() {
        let with_port = Url::parse("http://proxy.example:3128").unwrap();
        assert_eq!(endpoint_key(&with_port), "proxy.example:3128");

        let without_port = Url::parse("http://proxy.example").unwrap();
        assert_eq!(endpoint_key(&without_port), "proxy.example");
    }
}
