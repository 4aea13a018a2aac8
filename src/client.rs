//! High-level client with builder pattern.
//!
//! # Example
//!
//! ```rust,ignore
//! use netfetch::Client;
//!
//! let client = Client::builder()
//!     .memory_cache()
//!     .build();
//!
//! let resp = client.get("http://example.com/")
//!     .send()
//!     .await?;
//! ```

use crate::base::neterror::NetError;
use crate::http::auth::{Authenticator, NoAuth};
use crate::http::body::RequestBody;
use crate::http::cache::{MemoryCache, ResponseCache};
use crate::http::cookies::{CookieStore, NoCookies};
use crate::http::engine::{EngineConfig, Request, RequestEngine};
use crate::http::headers::HeaderTable;
use crate::http::response::HttpResponse;
use crate::socket::connection::{TcpTransport, Transport};
use crate::socket::pool::ConnectionPool;
use crate::socket::proxy::{EnvProxySelector, FixedProxySelector, ProxySelector, ProxyServer};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_USER_AGENT: &str = concat!("netfetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client. Cheap to clone; clones share the connection pool and all
/// collaborators.
///
/// Use [`Client::builder()`] to configure and create one.
#[derive(Clone)]
pub struct Client {
    config: Arc<EngineConfig>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a client with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Start building a GET request.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start building a POST request.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start building a PUT request.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Start building a DELETE request.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Start building a HEAD request.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a request with a custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            url: url.as_ref().to_string(),
            headers: HeaderTable::new(),
            body: RequestBody::Empty,
        }
    }

    /// Drop every idle pooled connection.
    pub fn close_idle_connections(&self) {
        self.config.pool.close_idle();
    }
}

/// Builder for creating a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn ResponseCache>>,
    cookies: Arc<dyn CookieStore>,
    authenticator: Arc<dyn Authenticator>,
    proxy_selector: Arc<dyn ProxySelector>,
    user_agent: String,
    follow_redirects: bool,
    connect_timeout: Duration,
    read_timeout: Duration,
    max_idle_per_group: usize,
    max_response_size: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            transport: Arc::new(TcpTransport),
            cache: None,
            cookies: Arc::new(NoCookies),
            authenticator: Arc::new(NoAuth),
            proxy_selector: Arc::new(EnvProxySelector::from_env()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            follow_redirects: true,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            max_idle_per_group: 6,
            max_response_size: 64 * 1024 * 1024,
        }
    }
}

impl ClientBuilder {
    /// Replace the byte-stream transport (TLS, test doubles).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Attach a response cache.
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach an in-memory response cache with default limits.
    pub fn memory_cache(self) -> Self {
        self.cache(Arc::new(MemoryCache::new()))
    }

    /// Attach a cookie store.
    pub fn cookie_store(mut self, cookies: Arc<dyn CookieStore>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Attach an authenticator consulted on 401 and 407 responses.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Route every request through one proxy.
    pub fn proxy(self, server: ProxyServer) -> Self {
        self.proxy_selector(Arc::new(FixedProxySelector::new(server)))
    }

    /// Replace the proxy selection policy.
    pub fn proxy_selector(mut self, selector: Arc<dyn ProxySelector>) -> Self {
        self.proxy_selector = selector;
        self
    }

    /// Set the `User-Agent` sent when the request doesn't carry one.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Enable or disable automatic redirect following.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Bound connection establishment.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound each wait for response bytes.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Idle keep-alive connections retained per destination.
    pub fn max_idle_per_group(mut self, max: usize) -> Self {
        self.max_idle_per_group = max;
        self
    }

    /// Largest response body the client will buffer.
    pub fn max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    /// Build the client.
    pub fn build(self) -> Client {
        let pool = ConnectionPool::new(self.max_idle_per_group, self.connect_timeout);
        Client {
            config: Arc::new(EngineConfig {
                transport: self.transport,
                pool,
                cache: self.cache,
                cookies: self.cookies,
                authenticator: self.authenticator,
                proxy_selector: self.proxy_selector,
                user_agent: self.user_agent,
                follow_redirects: self.follow_redirects,
                read_timeout: self.read_timeout,
                max_response_size: self.max_response_size,
            }),
        }
    }
}

/// Builder for a single request.
pub struct RequestBuilder {
    client: Client,
    method: Method,
    url: String,
    headers: HeaderTable,
    body: RequestBody,
}

impl RequestBuilder {
    /// Add a header, keeping any existing entries with the same name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Replace every entry of a header.
    pub fn set_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Stream the request body from a reader. When `length` is `None` the
    /// body is sent with chunked transfer encoding. Streamed requests
    /// cannot be retried or redirected.
    pub fn stream_body(
        mut self,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
        length: Option<u64>,
    ) -> Self {
        self.body = RequestBody::Streamed { reader: Box::new(reader), length };
        self
    }

    /// Set a JSON body and `Content-Type`.
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        if let Ok(bytes) = serde_json::to_vec(json) {
            self.body = RequestBody::from(bytes);
            self.headers.set("Content-Type", "application/json");
        }
        self
    }

    /// Execute the request.
    pub async fn send(self) -> Result<HttpResponse, NetError> {
        let url = Url::parse(&self.url).map_err(|_| NetError::InvalidUrl)?;
        let request = Request {
            method: self.method.as_str().to_string(),
            url,
            headers: self.headers,
            body: self.body,
        };
        RequestEngine::new(self.client.config.clone(), request)?
            .execute()
            .await
    }
}
