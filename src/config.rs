use crate::error::{Result, ShroudError};
use std::collections::HashMap;
use std::env;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Proxy user credentials
    pub credentials: CredentialStore,
    /// Tunnel routing configuration
    pub tunnel: TunnelConfig,
    /// External IP checker provider (aws, amazon, akamai)
    pub ip_checker: String,
    /// Secret for signed link tokens; generated at startup when unset
    pub jwt_secret: Option<String>,
    /// Landing page content as a JSON document
    pub landing_page: String,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public base URL used when materializing proxy links
    pub base_url: Url,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Port to bind to (default: 8080)
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

/// Username → password map backing proxy authentication
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    /// Parse a `user:pass,user2:pass2` list
    pub fn parse(raw: &str) -> Result<Self> {
        let mut users = HashMap::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (user, pass) = entry.split_once(':').ok_or_else(|| {
                ShroudError::InvalidConfig(format!(
                    "credential entry must be user:password, got {entry:?}"
                ))
            })?;
            if user.is_empty() {
                return Err(ShroudError::InvalidConfig(
                    "credential entry has an empty username".into(),
                ));
            }
            users.insert(user.to_string(), pass.to_string());
        }
        Ok(Self { users })
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check a username/password pair against the store
    pub fn is_authorized(&self, user: &str, pass: &str) -> bool {
        self.users.get(user).map(String::as_str) == Some(pass)
    }

    /// Stored password for a user, if any
    pub fn password(&self, user: &str) -> Option<&str> {
        self.users.get(user).map(String::as_str)
    }
}

/// How a single hostname routes outbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDirective {
    /// Explicit proxy endpoint (http, https or socks5 URL)
    Endpoint(Url),
    /// Route through the default proxy
    UseDefault,
    /// Force a direct connection
    Direct,
}

#[derive(Debug, Clone, Default)]
pub struct TunnelConfig {
    /// Proxy for plain-http targets, also the default route endpoint
    pub http_proxy: Option<Url>,
    /// Proxy for https targets; inherits the http proxy when unset
    pub https_proxy: Option<Url>,
    /// Per-hostname route directives
    pub routes: Vec<(String, RouteDirective)>,
    /// Ambient no-proxy exclusion list; `*` excludes every host
    pub no_proxy: Option<String>,
}

impl TunnelConfig {
    /// Endpoint backing `true` directives and the wildcard entry
    pub fn default_endpoint(&self) -> Option<&Url> {
        self.http_proxy.as_ref().or(self.https_proxy.as_ref())
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let base_url = get_env_or("SHROUD_BASE_URL", "http://localhost:8080");
        let base_url = Url::parse(&base_url).map_err(|e| {
            ShroudError::InvalidConfig(format!("SHROUD_BASE_URL must be a valid URL: {e}"))
        })?;

        let ip_checker = get_env_or("SHROUD_IP_CHECKER", "akamai");
        match ip_checker.as_str() {
            "aws" | "amazon" | "akamai" => {}
            other => {
                return Err(ShroudError::InvalidConfig(format!(
                    "SHROUD_IP_CHECKER must be one of aws, amazon, akamai, got {other:?}"
                )))
            }
        }

        Ok(Config {
            server: ServerConfig {
                base_url,
                host: get_env_or("SHROUD_HOST", "0.0.0.0"),
                port: get_env_or("SHROUD_PORT", "8080").parse().map_err(|_| {
                    ShroudError::InvalidConfig("SHROUD_PORT must be a valid port number".into())
                })?,
            },
            credentials: CredentialStore::parse(&get_env_or("SHROUD_PROXY_AUTH", ""))?,
            tunnel: parse_tunnel()?,
            ip_checker,
            jwt_secret: env::var("SHROUD_JWT_SECRET").ok().filter(|s| !s.is_empty()),
            landing_page: get_env_or("SHROUD_LANDING_PAGE", "{}"),
            log: LogConfig {
                level: get_env_or("SHROUD_LOG_LEVEL", "info"),
                format: get_env_or("SHROUD_LOG_FORMAT", "json"),
            },
        })
    }

    /// Startup validation that has to hold before the listener binds
    pub fn validate(&self) -> Result<()> {
        if self.credentials.is_empty() {
            return Err(ShroudError::InvalidConfig(
                "SHROUD_PROXY_AUTH: at least one user:password pair is required".into(),
            ));
        }
        Ok(())
    }

    /// Get the server bind address
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parse the tunnel environment into explicit routing state.
///
/// `SHROUD_TUNNEL` is a comma-separated list of `host:directive` entries,
/// where a directive is a proxy URL, `true` for the default proxy, or
/// `false` for direct. Entries split on the first colon so URL directives
/// keep their own port colons. The `*` host does not define a route; it
/// only toggles the ambient no-proxy list (`*:false` excludes every host
/// from the ambient proxy, `*:true` clears the exclusions inherited from
/// `NO_PROXY`).
fn parse_tunnel() -> Result<TunnelConfig> {
    let http_proxy = parse_proxy_var("SHROUD_HTTP_PROXY")?;
    // https falls back to the http proxy when not set separately.
    let https_proxy = parse_proxy_var("SHROUD_HTTPS_PROXY")?.or_else(|| http_proxy.clone());
    let mut no_proxy = env::var("NO_PROXY")
        .or_else(|_| env::var("no_proxy"))
        .ok()
        .filter(|s| !s.is_empty());

    let raw = get_env_or("SHROUD_TUNNEL", "");
    let mut routes = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (host, directive) = entry.split_once(':').ok_or_else(|| {
            ShroudError::InvalidConfig(format!(
                "SHROUD_TUNNEL entry must be host:directive, got {entry:?}"
            ))
        })?;

        if host == "*" {
            match directive {
                "false" => no_proxy = Some("*".to_string()),
                "true" => no_proxy = None,
                _ => {
                    return Err(ShroudError::InvalidConfig(
                        "SHROUD_TUNNEL wildcard entry must be *:true or *:false; \
                         set the default proxy via SHROUD_HTTP_PROXY"
                            .into(),
                    ))
                }
            }
            continue;
        }

        let directive = match directive {
            "true" => RouteDirective::UseDefault,
            "false" => RouteDirective::Direct,
            url => {
                let url = Url::parse(url).map_err(|e| {
                    ShroudError::InvalidConfig(format!(
                        "SHROUD_TUNNEL entry for {host:?} must be true, false or a proxy URL: {e}"
                    ))
                })?;
                RouteDirective::Endpoint(url)
            }
        };
        routes.push((host.to_string(), directive));
    }

    Ok(TunnelConfig {
        http_proxy,
        https_proxy,
        routes,
        no_proxy,
    })
}

fn parse_proxy_var(key: &str) -> Result<Option<Url>> {
    let raw = env::var(key).unwrap_or_default();
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let url = Url::parse(raw)
        .map_err(|e| ShroudError::InvalidConfig(format!("{key} must be a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" | "socks5" | "socks5h" => Ok(Some(url)),
        other => Err(ShroudError::InvalidConfig(format!(
            "{key} has unsupported scheme: {other}"
        ))),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A fully populated config for tests, independent of the environment
    pub fn test_config(base_url: &str) -> Config {
        Config {
            server: ServerConfig {
                base_url: Url::parse(base_url).unwrap(),
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            credentials: CredentialStore::parse("alice:secret,bob:hunter2").unwrap(),
            tunnel: TunnelConfig::default(),
            ip_checker: "akamai".to_string(),
            jwt_secret: Some("test-signing-secret".to_string()),
            landing_page: "{}".to_string(),
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    pub fn config_with_landing(page: &str) -> Config {
        let mut config = test_config("http://gateway.test");
        config.landing_page = page.to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "SHROUD_BASE_URL",
        "SHROUD_HOST",
        "SHROUD_PORT",
        "SHROUD_PROXY_AUTH",
        "SHROUD_HTTP_PROXY",
        "SHROUD_HTTPS_PROXY",
        "SHROUD_TUNNEL",
        "SHROUD_IP_CHECKER",
        "SHROUD_JWT_SECRET",
        "SHROUD_LANDING_PAGE",
        "SHROUD_LOG_LEVEL",
        "SHROUD_LOG_FORMAT",
        "NO_PROXY",
        "no_proxy",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.server.base_url.as_str(), "http://localhost:8080/");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.credentials.is_empty());
        assert!(config.tunnel.http_proxy.is_none());
        assert!(config.tunnel.routes.is_empty());
        assert_eq!(config.ip_checker, "akamai");
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.landing_page, "{}");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_BASE_URL", "https://proxy.example.com");
        env::set_var("SHROUD_PORT", "9000");
        env::set_var("SHROUD_PROXY_AUTH", "alice:secret, bob:hunter2");
        env::set_var("SHROUD_HTTP_PROXY", "http://egress.example:3128");
        env::set_var("SHROUD_IP_CHECKER", "aws");

        let config = Config::from_env().unwrap();

        assert_eq!(config.server.base_url.as_str(), "https://proxy.example.com/");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.credentials.len(), 2);
        assert!(config.credentials.is_authorized("alice", "secret"));
        assert!(config.credentials.is_authorized("bob", "hunter2"));
        assert!(!config.credentials.is_authorized("alice", "wrong"));
        assert_eq!(
            config.tunnel.http_proxy.as_ref().map(Url::as_str),
            Some("http://egress.example:3128/")
        );
        assert_eq!(config.ip_checker, "aws");
    }

    #[test]
    fn test_config_from_env_invalid_port() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_PORT", "not-a-port");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ShroudError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_invalid_ip_checker() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_IP_CHECKER", "cloudflare");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ShroudError::InvalidConfig(_)));
    }

    #[test]
    fn test_credential_store_rejects_malformed_entry() {
        let err = CredentialStore::parse("alice:secret,loosecannon").unwrap_err();
        assert!(matches!(err, ShroudError::InvalidConfig(_)));
    }

    #[test]
    fn test_credential_store_password_lookup() {
        let store = CredentialStore::parse("alice:secret").unwrap();
        assert_eq!(store.password("alice"), Some("secret"));
        assert_eq!(store.password("mallory"), None);
    }

    #[test]
    fn test_validate_requires_credentials() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ShroudError::InvalidConfig(_)));

        env::set_var("SHROUD_PROXY_AUTH", "alice:secret");
        let config = Config::from_env().unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_tunnel_directives() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_HTTP_PROXY", "http://default.example:8888");
        env::set_var(
            "SHROUD_TUNNEL",
            "a.example:http://p1.example:3128,b.example:true,c.example:false",
        );

        let config = Config::from_env().unwrap();
        let routes: HashMap<_, _> = config.tunnel.routes.iter().cloned().collect();

        assert_eq!(
            routes.get("a.example"),
            Some(&RouteDirective::Endpoint(
                Url::parse("http://p1.example:3128").unwrap()
            ))
        );
        assert_eq!(routes.get("b.example"), Some(&RouteDirective::UseDefault));
        assert_eq!(routes.get("c.example"), Some(&RouteDirective::Direct));
        assert_eq!(
            config.tunnel.default_endpoint().map(Url::as_str),
            Some("http://default.example:8888/")
        );
    }

    #[test]
    fn test_parse_tunnel_https_proxy_inherits_http_proxy() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_HTTP_PROXY", "http://egress.example:3128");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.tunnel.https_proxy.as_ref().map(Url::as_str),
            Some("http://egress.example:3128/")
        );

        env::set_var("SHROUD_HTTPS_PROXY", "http://secure.example:3129");
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.tunnel.https_proxy.as_ref().map(Url::as_str),
            Some("http://secure.example:3129/")
        );
    }

    #[test]
    fn test_parse_tunnel_wildcard_toggles_no_proxy() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_TUNNEL", "*:false");
        let config = Config::from_env().unwrap();
        assert_eq!(config.tunnel.no_proxy.as_deref(), Some("*"));
        assert!(config.tunnel.routes.is_empty(), "wildcard defines no route");

        env::set_var("NO_PROXY", "internal.example");
        env::set_var("SHROUD_TUNNEL", "*:true");
        let config = Config::from_env().unwrap();
        assert!(config.tunnel.no_proxy.is_none());

        env::set_var("SHROUD_TUNNEL", "");
        let config = Config::from_env().unwrap();
        assert_eq!(config.tunnel.no_proxy.as_deref(), Some("internal.example"));
    }

    #[test]
    fn test_parse_tunnel_rejects_bad_values() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("SHROUD_TUNNEL", "a.example:notaurl");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ShroudError::InvalidConfig(_)
        ));

        env::set_var("SHROUD_TUNNEL", "entry-without-directive");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ShroudError::InvalidConfig(_)
        ));

        env::set_var("SHROUD_TUNNEL", "*:http://explicit.example:3128");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ShroudError::InvalidConfig(_)
        ));

        env::set_var("SHROUD_TUNNEL", "");
        env::set_var("SHROUD_HTTP_PROXY", "ftp://wrong.example");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ShroudError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_addr_formatter() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();
        assert_eq!(config.addr(), "0.0.0.0:8080");
    }
}
