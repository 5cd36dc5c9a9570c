//! Hostname → proxy route table with parent-domain fallback

use dashmap::DashMap;
use url::Url;

use crate::config::{RouteDirective, TunnelConfig};
use crate::tunnel::TunnelSelector;

const WILDCARD: &str = "*";

/// Outcome of a route lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Fetch through this proxy endpoint
    Proxy(Url),
    /// Connect directly
    Direct,
    /// No explicit route; the ambient environment proxy applies
    Ambient,
}

/// Immutable routing state built once at startup.
///
/// Entries map a hostname to a proxy endpoint (`None` forces direct). The
/// wildcard entry always exists. Lookups that hit a parent domain are
/// memoized under the original hostname, so repeated lookups are O(1);
/// memoized entries are visible to iteration and get deduplicated by
/// endpoint in the egress IP report.
pub struct RouteTable {
    entries: DashMap<String, Option<Url>>,
    http_proxy: Option<Url>,
    https_proxy: Option<Url>,
    no_proxy: NoProxyList,
}

impl RouteTable {
    pub fn new(cfg: &TunnelConfig) -> Self {
        let entries = DashMap::new();
        entries.insert(WILDCARD.to_string(), cfg.default_endpoint().cloned());

        for (host, directive) in &cfg.routes {
            let endpoint = match directive {
                RouteDirective::Endpoint(url) => Some(url.clone()),
                RouteDirective::UseDefault => cfg.default_endpoint().cloned(),
                RouteDirective::Direct => None,
            };
            entries.insert(host.to_ascii_lowercase(), endpoint);
        }

        Self {
            entries,
            http_proxy: cfg.http_proxy.clone(),
            https_proxy: cfg.https_proxy.clone(),
            no_proxy: NoProxyList::parse(cfg.no_proxy.as_deref()),
        }
    }

    /// Route decision for a hostname under the given selector
    pub fn decide(&self, hostname: &str, selector: TunnelSelector) -> RouteDecision {
        match selector {
            TunnelSelector::None => RouteDecision::Direct,
            TunnelSelector::Forced => self.wildcard_decision(),
            TunnelSelector::Auto => self.auto_decision(hostname),
        }
    }

    /// Final proxy endpoint for a target URL, with the ambient fallback applied
    pub fn resolve_proxy(&self, target: &Url, selector: TunnelSelector) -> Option<Url> {
        let host = target.host_str()?;
        match self.decide(host, selector) {
            RouteDecision::Proxy(url) => Some(url),
            RouteDecision::Direct => None,
            RouteDecision::Ambient => self.ambient_for(target.scheme(), host),
        }
    }

    /// Snapshot of all entries, memoized ones included
    pub fn entries(&self) -> Vec<(String, Option<Url>)> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// The wildcard route endpoint, if any
    pub fn wildcard_endpoint(&self) -> Option<Url> {
        self.entries.get(WILDCARD).and_then(|e| e.value().clone())
    }

    fn wildcard_decision(&self) -> RouteDecision {
        match self.wildcard_endpoint() {
            Some(url) => RouteDecision::Proxy(url),
            None => RouteDecision::Direct,
        }
    }

    fn auto_decision(&self, hostname: &str) -> RouteDecision {
        if hostname.is_empty() {
            return RouteDecision::Direct;
        }
        let hostname = hostname.to_ascii_lowercase();

        if let Some(entry) = self.entries.get(&hostname) {
            return entry_decision(entry.value());
        }

        // Walk parent domains: a.b.c -> b.c -> c
        let mut rest = hostname.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            rest = parent;
            if let Some(entry) = self.entries.get(rest) {
                let endpoint = entry.value().clone();
                drop(entry);
                self.entries.insert(hostname.clone(), endpoint.clone());
                return entry_decision(&endpoint);
            }
        }

        RouteDecision::Ambient
    }

    fn ambient_for(&self, scheme: &str, host: &str) -> Option<Url> {
        if self.no_proxy.matches(&host.to_ascii_lowercase()) {
            return None;
        }
        match scheme {
            "http" => self.http_proxy.clone(),
            "https" => self.https_proxy.clone(),
            _ => None,
        }
    }
}

fn entry_decision(endpoint: &Option<Url>) -> RouteDecision {
    match endpoint {
        Some(url) => RouteDecision::Proxy(url.clone()),
        None => RouteDecision::Direct,
    }
}

/// Hosts excluded from the ambient proxy
#[derive(Debug, Clone, Default)]
struct NoProxyList {
    all: bool,
    entries: Vec<String>,
}

impl NoProxyList {
    fn parse(raw: Option<&str>) -> Self {
        let mut list = Self::default();
        let Some(raw) = raw else {
            return list;
        };
        for entry in raw.split(',') {
            let entry = entry.trim().to_ascii_lowercase();
            if entry.is_empty() {
                continue;
            }
            if entry == "*" {
                list.all = true;
                continue;
            }
            let entry = entry
                .trim_start_matches("*.")
                .trim_start_matches('.')
                .to_string();
            if !entry.is_empty() {
                list.entries.push(entry);
            }
        }
        list
    }

    /// A domain entry matches the name itself and all subdomains
    fn matches(&self, host: &str) -> bool {
        if self.all {
            return true;
        }
        self.entries.iter().any(|entry| {
            host == entry
                || host
                    .strip_suffix(entry.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}
