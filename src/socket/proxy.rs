//! Proxy selection.
//!
//! A [`ProxySelector`] maps each request URL to a route: direct to the
//! origin, or through an HTTP proxy. The environment-variable selector
//! honors `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` bypass rules.

use url::Url;

/// An HTTP proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyServer {
    pub host: String,
    pub port: u16,
}

impl ProxyServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parse `host:port`, `http://host:port`, or bare `host` (port 80).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let without_scheme = value
            .strip_prefix("http://")
            .or_else(|| value.strip_prefix("https://"))
            .unwrap_or(value);
        let without_scheme = without_scheme.trim_end_matches('/');
        match without_scheme.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().ok()?;
                if host.is_empty() {
                    return None;
                }
                Some(Self::new(host, port))
            }
            None if !without_scheme.is_empty() => Some(Self::new(without_scheme, 80)),
            None => None,
        }
    }
}

impl std::fmt::Display for ProxyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Route for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProxyChoice {
    Direct,
    Proxy(ProxyServer),
}

impl ProxyChoice {
    pub fn proxy(&self) -> Option<&ProxyServer> {
        match self {
            ProxyChoice::Direct => None,
            ProxyChoice::Proxy(server) => Some(server),
        }
    }
}

/// Per-request proxy routing policy.
pub trait ProxySelector: Send + Sync {
    /// Routes to try for `url`, in preference order. The engine connects
    /// through each candidate in turn, moving on when a connect fails.
    fn select(&self, url: &Url) -> Vec<ProxyChoice>;

    /// Notification that connecting through `proxy` failed. Selectors may
    /// demote the proxy; the default ignores it.
    fn connect_failed(&self, _proxy: &ProxyServer) {}
}

/// Always connects directly. The default.
pub struct DirectSelector;

impl ProxySelector for DirectSelector {
    fn select(&self, _url: &Url) -> Vec<ProxyChoice> {
        vec![ProxyChoice::Direct]
    }
}

/// Routes every request through one fixed proxy, falling back to a direct
/// connection when the proxy is unreachable.
pub struct FixedProxySelector {
    server: ProxyServer,
}

impl FixedProxySelector {
    pub fn new(server: ProxyServer) -> Self {
        Self { server }
    }
}

impl ProxySelector for FixedProxySelector {
    fn select(&self, _url: &Url) -> Vec<ProxyChoice> {
        vec![ProxyChoice::Proxy(self.server.clone()), ProxyChoice::Direct]
    }
}

/// Selector configured from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`.
pub struct EnvProxySelector {
    http_proxy: Option<ProxyServer>,
    https_proxy: Option<ProxyServer>,
    no_proxy: Vec<String>,
}

impl EnvProxySelector {
    pub fn from_env() -> Self {
        Self::from_values(
            env_var("HTTP_PROXY").as_deref(),
            env_var("HTTPS_PROXY").as_deref(),
            env_var("NO_PROXY").as_deref(),
        )
    }

    fn from_values(
        http_proxy: Option<&str>,
        https_proxy: Option<&str>,
        no_proxy: Option<&str>,
    ) -> Self {
        Self {
            http_proxy: http_proxy.and_then(ProxyServer::parse),
            https_proxy: https_proxy.and_then(ProxyServer::parse),
            no_proxy: no_proxy
                .unwrap_or_default()
                .split(',')
                .map(|rule| rule.trim().trim_start_matches('.').to_lowercase())
                .filter(|rule| !rule.is_empty())
                .collect(),
        }
    }

    fn bypasses(&self, host: &str) -> bool {
        let host = host.to_lowercase();
        self.no_proxy.iter().any(|rule| {
            rule == "*" || host == *rule || host.ends_with(&format!(".{rule}"))
        })
    }
}

impl ProxySelector for EnvProxySelector {
    fn select(&self, url: &Url) -> Vec<ProxyChoice> {
        let host = match url.host_str() {
            Some(host) => host,
            None => return vec![ProxyChoice::Direct],
        };
        if self.bypasses(host) {
            return vec![ProxyChoice::Direct];
        }
        let proxy = match url.scheme() {
            "https" => self.https_proxy.as_ref(),
            _ => self.http_proxy.as_ref(),
        };
        match proxy {
            Some(server) => vec![ProxyChoice::Proxy(server.clone()), ProxyChoice::Direct],
            None => vec![ProxyChoice::Direct],
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .or_else(|_| std::env::var(name.to_lowercase()))
        .ok()
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_proxy_server() {
        assert_eq!(
            ProxyServer::parse("proxy.example.com:8080"),
            Some(ProxyServer::new("proxy.example.com", 8080))
        );
        assert_eq!(
            ProxyServer::parse("http://proxy.example.com:3128/"),
            Some(ProxyServer::new("proxy.example.com", 3128))
        );
        assert_eq!(
            ProxyServer::parse("proxy.example.com"),
            Some(ProxyServer::new("proxy.example.com", 80))
        );
        assert_eq!(ProxyServer::parse(""), None);
        assert_eq!(ProxyServer::parse("host:notaport"), None);
    }

    #[test]
    fn test_env_selector_scheme_routing() {
        let selector = EnvProxySelector::from_values(
            Some("plain.proxy:3128"),
            Some("secure.proxy:3129"),
            None,
        );
        assert_eq!(
            selector.select(&url("http://example.com/")),
            vec![
                ProxyChoice::Proxy(ProxyServer::new("plain.proxy", 3128)),
                ProxyChoice::Direct,
            ]
        );
        assert_eq!(
            selector.select(&url("https://example.com/")),
            vec![
                ProxyChoice::Proxy(ProxyServer::new("secure.proxy", 3129)),
                ProxyChoice::Direct,
            ]
        );
    }

    #[test]
    fn test_no_proxy_bypass() {
        let selector = EnvProxySelector::from_values(
            Some("proxy:3128"),
            None,
            Some("localhost, .internal.example.com"),
        );
        assert_eq!(selector.select(&url("http://localhost/")), vec![ProxyChoice::Direct]);
        assert_eq!(
            selector.select(&url("http://svc.internal.example.com/")),
            vec![ProxyChoice::Direct]
        );
        assert_eq!(
            selector.select(&url("http://example.com/"))[0],
            ProxyChoice::Proxy(ProxyServer::new("proxy", 3128))
        );
    }

    #[test]
    fn test_no_proxy_wildcard() {
        let selector = EnvProxySelector::from_values(Some("proxy:3128"), None, Some("*"));
        assert_eq!(selector.select(&url("http://example.com/")), vec![ProxyChoice::Direct]);
    }

    #[test]
    fn test_fixed_selector_falls_back_to_direct() {
        let selector = FixedProxySelector::new(ProxyServer::new("p", 8080));
        assert_eq!(
            selector.select(&url("http://anything/")),
            vec![
                ProxyChoice::Proxy(ProxyServer::new("p", 8080)),
                ProxyChoice::Direct,
            ]
        );
    }
}
