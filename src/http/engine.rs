//! The request engine: one logical request from URL to final response.
//!
//! Drives the attempt loop: consult the cache, check out a connection,
//! send the physical request, read the response, then ask the retry
//! machinery whether the response is final. Redirects and authentication
//! retries happen inside the loop and are invisible to the caller.

use crate::base::loadstate::{LoadState, LoadStateHandle};
use crate::base::neterror::NetError;
use crate::http::auth::Authenticator;
use crate::http::body::{drain_body, gunzip, write_chunked, RequestBody, TransferDecoder};
use crate::http::cache::{CachedResponse, ResponseCache};
use crate::http::cachecontrol::CacheDirectives;
use crate::http::cachepolicy::{
    is_cacheable, is_cacheable_method, CacheMetadata, RequestDirectives, ResponseSource,
};
use crate::http::cookies::CookieStore;
use crate::http::date::now_millis;
use crate::http::headers::{read_wire_line, HeaderTable};
use crate::http::response::HttpResponse;
use crate::http::retry::{effective_port, RetryContext, RetryDecision, RetryStateMachine};
use crate::socket::connection::{Address, PooledConnection, Transport};
use crate::socket::pool::ConnectionPool;
use crate::socket::proxy::{ProxyChoice, ProxySelector};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};
use url::Url;

/// Requests and small bodies are combined into one write when they fit in
/// this buffer, saving a packet on the common path.
const COMBINED_WRITE_LIMIT: usize = 32768;

/// A logical request as the caller specified it.
pub struct Request {
    pub method: String,
    pub url: Url,
    pub headers: HeaderTable,
    pub body: RequestBody,
}

/// Everything the engine needs besides the request itself.
pub struct EngineConfig {
    pub transport: Arc<dyn Transport>,
    pub pool: ConnectionPool,
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub cookies: Arc<dyn CookieStore>,
    pub authenticator: Arc<dyn Authenticator>,
    pub proxy_selector: Arc<dyn ProxySelector>,
    pub user_agent: String,
    pub follow_redirects: bool,
    pub read_timeout: Duration,
    pub max_response_size: usize,
}

/// What one network exchange produced.
struct Exchange {
    headers: HeaderTable,
    sent_millis: i64,
    received_millis: i64,
}

/// How an attempt failed, seen from the retry loop.
enum AttemptFailure {
    /// The error is final.
    Fatal(NetError),
    /// A reused connection died before yielding a response; the request is
    /// replayable, so a fresh connection may still succeed.
    Stale(NetError),
}

impl From<NetError> for AttemptFailure {
    fn from(e: NetError) -> Self {
        AttemptFailure::Fatal(e)
    }
}

/// Per-request state machine. Construct, then [`RequestEngine::execute`].
pub struct RequestEngine {
    config: Arc<EngineConfig>,
    method: String,
    url: Url,
    headers: HeaderTable,
    body: RequestBody,
    body_replayable: bool,
    proxy: ProxyChoice,
    /// Routes left to fall back to when connecting via `proxy` fails.
    proxy_candidates: VecDeque<ProxyChoice>,
    retry: RetryStateMachine,
    load_state: LoadStateHandle,
    /// Connection carried over from an attempt whose retry may reuse it.
    held_connection: Option<PooledConnection>,
    /// Final status line received while waiting for a 100-continue.
    pending_status_line: Option<String>,
    /// Validators this engine attached (as opposed to the caller's), to be
    /// withdrawn before the next cache consultation.
    attached_validators: bool,
    /// Whether this engine added `Accept-Encoding: gzip` and therefore owns
    /// decompression.
    transparent_gzip: bool,
}

impl RequestEngine {
    pub fn new(config: Arc<EngineConfig>, request: Request) -> Result<Self, NetError> {
        let scheme = request.url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(NetError::UnsupportedScheme);
        }
        if request.url.host_str().is_none() {
            return Err(NetError::InvalidUrl);
        }
        let mut candidates: VecDeque<ProxyChoice> =
            config.proxy_selector.select(&request.url).into();
        let proxy = candidates.pop_front().unwrap_or(ProxyChoice::Direct);
        let body_replayable = request.body.is_replayable();
        Ok(Self {
            config,
            method: request.method.to_uppercase(),
            url: request.url,
            headers: request.headers,
            body: request.body,
            body_replayable,
            proxy,
            proxy_candidates: candidates,
            retry: RetryStateMachine::new(),
            load_state: LoadStateHandle::new(),
            held_connection: None,
            pending_status_line: None,
            attached_validators: false,
            transparent_gzip: false,
        })
    }

    /// Handle observing this request's progress. Clone it before calling
    /// [`Self::execute`] to watch from another task.
    pub fn load_state(&self) -> LoadStateHandle {
        self.load_state.clone()
    }

    /// Run the request to completion.
    pub async fn execute(mut self) -> Result<HttpResponse, NetError> {
        let mut force_new_connection = false;
        loop {
            self.withdraw_validators();
            self.prepare_headers();

            self.load_state.set(LoadState::ResolvingCache);
            let (source, cached) = self.consult_cache();
            let request_directives = RequestDirectives::from_headers(&self.headers);
            if request_directives.only_if_cached && source.requires_network() {
                return Err(NetError::UnsatisfiableRequest);
            }
            if let (ResponseSource::Cache, Some(entry)) = (source, &cached) {
                debug!(url = %self.url, "serving from cache");
                self.load_state.set(LoadState::Idle);
                return Ok(HttpResponse::new(
                    entry.headers.clone(),
                    entry.body.clone(),
                    ResponseSource::Cache,
                ));
            }

            let exchange = match self.attempt(force_new_connection).await {
                Ok(exchange) => exchange,
                Err(AttemptFailure::Stale(e)) => {
                    debug!(url = %self.url, error = %e, "stale connection, retrying on a new one");
                    force_new_connection = true;
                    continue;
                }
                Err(AttemptFailure::Fatal(e)) => return Err(e),
            };
            force_new_connection = false;

            self.config.cookies.store(&self.url, &exchange.headers);

            // A conditional request resolves here: either the cached body is
            // promoted or the network response replaces it.
            if source == ResponseSource::ConditionalCache {
                if let Some(entry) = cached {
                    let metadata = CacheMetadata::from_response(
                        &entry.headers,
                        entry.sent_millis,
                        entry.received_millis,
                    );
                    if metadata.validate(&exchange.headers) {
                        return self.finish_validated(entry, exchange).await;
                    }
                }
            }

            let mut ctx = RetryContext {
                url: &mut self.url,
                method: &self.method,
                request_headers: &mut self.headers,
                body_replayable: self.body_replayable,
                follow_redirects: self.config.follow_redirects,
                proxy: &mut self.proxy,
                authenticator: self.config.authenticator.as_ref(),
            };
            match self.retry.process(&exchange.headers, &mut ctx)? {
                RetryDecision::None => return self.finish_network(exchange).await,
                RetryDecision::SameConnection => {
                    trace!(url = %self.url, "retrying on the same connection");
                    self.discard_attempt_body(&exchange.headers).await?;
                }
                RetryDecision::NewConnection => {
                    trace!(url = %self.url, "retrying on a new connection");
                    self.held_connection = None;
                    self.reselect_proxy();
                }
            }
        }
    }

    // Re-route after the URL changed. A proxy already in use stays pinned
    // (a 305 names one explicitly) and keeps no fallback candidates.
    fn reselect_proxy(&mut self) {
        match self.proxy {
            ProxyChoice::Direct => {
                let mut candidates: VecDeque<ProxyChoice> =
                    self.config.proxy_selector.select(&self.url).into();
                self.proxy = candidates.pop_front().unwrap_or(ProxyChoice::Direct);
                self.proxy_candidates = candidates;
            }
            ProxyChoice::Proxy(_) => self.proxy_candidates.clear(),
        }
    }

    fn withdraw_validators(&mut self) {
        if self.attached_validators {
            self.headers.remove_all("If-Modified-Since");
            self.headers.remove_all("If-None-Match");
            self.attached_validators = false;
        }
    }

    /// Fill in the ambient headers a well-formed request needs. Idempotent
    /// across retries: caller-supplied values always win.
    fn prepare_headers(&mut self) {
        let host = self.url.host_str().unwrap_or_default();
        let host_header = match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        self.headers.add_if_absent("Host", host_header);
        self.headers.add_if_absent("Connection", "Keep-Alive");
        self.headers.add_if_absent("User-Agent", self.config.user_agent.clone());
        if self.headers.get("Accept-Encoding").is_none() {
            self.headers.add("Accept-Encoding", "gzip");
            self.transparent_gzip = true;
        }

        match &self.body {
            RequestBody::Empty => {}
            RequestBody::Buffered(bytes) => {
                self.headers.add_if_absent("Content-Length", bytes.len().to_string());
            }
            RequestBody::Streamed { length: Some(length), .. } => {
                self.headers.add_if_absent("Content-Length", length.to_string());
            }
            RequestBody::Streamed { length: None, .. } => {
                self.headers.add_if_absent("Transfer-Encoding", "chunked");
            }
        }

        for cookie in self.config.cookies.load(&self.url, &self.headers) {
            if !self.headers.get_all("Cookie").contains(&cookie.as_str()) {
                self.headers.add("Cookie", cookie);
            }
        }
    }

    /// Look up the cached entry and classify this attempt. Attaches
    /// validators to the outgoing headers when revalidation is due.
    fn consult_cache(&mut self) -> (ResponseSource, Option<CachedResponse>) {
        if !is_cacheable_method(&self.method) {
            return (ResponseSource::Network, None);
        }
        let cache = match &self.config.cache {
            Some(cache) => cache,
            None => return (ResponseSource::Network, None),
        };
        let entry = match cache.get(&self.url, &self.method) {
            Some(entry) => entry,
            None => return (ResponseSource::Network, None),
        };
        let metadata = CacheMetadata::from_response(
            &entry.headers,
            entry.sent_millis,
            entry.received_millis,
        );
        let had_conditions = self.headers.get("If-Modified-Since").is_some()
            || self.headers.get("If-None-Match").is_some();
        let source = metadata.choose_response_source(now_millis(), &mut self.headers);
        if source == ResponseSource::ConditionalCache && !had_conditions {
            self.attached_validators = true;
        }
        trace!(url = %self.url, ?source, "cache consulted");
        match source {
            ResponseSource::Network => (source, None),
            _ => (source, Some(entry)),
        }
    }

    fn address(&self) -> Address {
        Address {
            host: self.url.host_str().unwrap_or_default().to_string(),
            port: effective_port(&self.url),
            proxy: self.proxy.proxy().cloned(),
            tunnel: self.url.scheme() == "https" && self.proxy.proxy().is_some(),
        }
    }

    /// One physical exchange: connect, send, read status line and headers.
    async fn attempt(&mut self, force_new_connection: bool) -> Result<Exchange, AttemptFailure> {
        self.load_state.set(LoadState::Connecting);
        // Try each remaining route in order; a connect failure through a
        // proxy falls back to the next candidate before surfacing.
        let mut connection = loop {
            let address = self.address();
            if let Some(held) = self.held_connection.take() {
                if !force_new_connection && *held.address() == address {
                    break held;
                }
            }
            let acquired = self
                .config
                .pool
                .acquire(&address, self.config.transport.as_ref())
                .await;
            match acquired {
                Ok(mut connection) => {
                    if address.tunnel && connection.use_count() == 0 {
                        let proxy_authorization =
                            self.headers.get("Proxy-Authorization").map(str::to_string);
                        connection
                            .establish_tunnel(
                                &self.config.user_agent,
                                proxy_authorization.as_deref(),
                            )
                            .await?;
                    }
                    break connection;
                }
                Err(e) => {
                    if let Some(proxy) = address.proxy.as_ref() {
                        self.config.proxy_selector.connect_failed(proxy);
                    }
                    match self.proxy_candidates.pop_front() {
                        Some(next) => {
                            debug!(url = %self.url, error = %e, route = ?next, "connect failed, trying next route");
                            self.proxy = next;
                        }
                        None => return Err(e.into()),
                    }
                }
            }
        };

        let reused = connection.use_count() > 0;
        self.load_state.set(LoadState::SendingRequest);
        let sent_millis = now_millis();
        match self.send_and_read_headers(&mut connection).await {
            Ok(headers) => {
                let received_millis = now_millis();
                connection.mark_used();
                self.held_connection = Some(connection);
                Ok(Exchange { headers, sent_millis, received_millis })
            }
            Err(e) if reused && self.body_replayable && is_stale_failure(e) => {
                Err(AttemptFailure::Stale(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the request and read the response headers off `connection`.
    async fn send_and_read_headers(
        &mut self,
        connection: &mut PooledConnection,
    ) -> Result<HeaderTable, NetError> {
        let mut wire = HeaderTable::new();
        wire.set_status_line(format!("{} {} HTTP/1.1", self.method, self.request_target()));
        for (name, value) in self.headers.iter() {
            wire.add(name, value);
        }
        let head = wire.to_header_string();

        let expect_continue = self
            .headers
            .get("Expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"));

        let body = std::mem::take(&mut self.body);
        match body {
            RequestBody::Buffered(bytes)
                if !expect_continue && head.len() + bytes.len() <= COMBINED_WRITE_LIMIT =>
            {
                let mut combined = Vec::with_capacity(head.len() + bytes.len());
                combined.extend_from_slice(head.as_bytes());
                combined.extend_from_slice(&bytes);
                self.body = RequestBody::Buffered(bytes);
                connection.write_all(&combined).await?;
                connection.flush().await?;
            }
            RequestBody::Buffered(bytes) => {
                self.body = RequestBody::Buffered(bytes);
                connection.write_all(head.as_bytes()).await?;
                connection.flush().await?;
                if expect_continue && !self.await_continue(connection).await? {
                    // Server answered without wanting the body.
                    return self.read_response_headers(connection).await;
                }
                if let RequestBody::Buffered(bytes) = &self.body {
                    let bytes = bytes.clone();
                    connection.write_all(&bytes).await?;
                    connection.flush().await?;
                }
            }
            RequestBody::Empty => {
                connection.write_all(head.as_bytes()).await?;
                connection.flush().await?;
            }
            RequestBody::Streamed { mut reader, length } => {
                self.body_replayable = false;
                connection.write_all(head.as_bytes()).await?;
                connection.flush().await?;
                if expect_continue && !self.await_continue(connection).await? {
                    return self.read_response_headers(connection).await;
                }
                match length {
                    Some(length) => {
                        let mut limited = (&mut reader).take(length);
                        let mut chunk = [0u8; 8192];
                        loop {
                            let n = limited
                                .read(&mut chunk)
                                .await
                                .map_err(|e| NetError::from_io(&e))?;
                            if n == 0 {
                                break;
                            }
                            connection.write_all(&chunk[..n]).await?;
                        }
                    }
                    None => {
                        write_chunked(connection, &mut reader).await?;
                    }
                }
                connection.flush().await?;
            }
        }

        self.read_response_headers(connection).await
    }

    /// After sending the headers of an `Expect: 100-continue` request, wait
    /// for the interim response. Returns true when the body should be sent;
    /// a final status arriving instead is stashed for
    /// [`Self::read_response_headers`].
    async fn await_continue(
        &mut self,
        connection: &mut PooledConnection,
    ) -> Result<bool, NetError> {
        self.load_state.set(LoadState::WaitingForResponse);
        let line = tokio::time::timeout(self.config.read_timeout, read_wire_line(connection))
            .await
            .map_err(|_| NetError::ReadTimedOut)??
            .ok_or(NetError::ConnectionClosed)?;

        let mut interim = HeaderTable::new();
        interim.set_status_line(line.clone());
        if interim.response_code()? == 100 {
            interim.read_headers(connection).await?;
            return Ok(true);
        }
        self.pending_status_line = Some(line);
        Ok(false)
    }

    /// Read the status line and headers, skipping interim 100 responses.
    async fn read_response_headers(
        &mut self,
        connection: &mut PooledConnection,
    ) -> Result<HeaderTable, NetError> {
        self.load_state.set(LoadState::WaitingForResponse);
        let timeout = self.config.read_timeout;
        loop {
            let line = match self.pending_status_line.take() {
                Some(line) => line,
                None => tokio::time::timeout(timeout, read_wire_line(connection))
                    .await
                    .map_err(|_| NetError::ReadTimedOut)??
                    .ok_or(NetError::EmptyResponse)?,
            };
            let mut response = HeaderTable::new();
            response.set_status_line(line);
            let code = response.response_code()?;
            tokio::time::timeout(timeout, response.read_headers(connection))
                .await
                .map_err(|_| NetError::ReadTimedOut)??;
            if code == 100 {
                continue;
            }
            self.load_state.set(LoadState::ReadingResponse);
            return Ok(response);
        }
    }

    /// Request target for the request line: origin-form normally,
    /// absolute-form when talking to a proxy without a tunnel.
    fn request_target(&self) -> String {
        let absolute = self.proxy.proxy().is_some() && self.url.scheme() != "https";
        if absolute {
            let mut url = self.url.clone();
            url.set_fragment(None);
            return url.to_string();
        }
        let path = self.url.path();
        match self.url.query() {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        }
    }

    /// Read and discard the body of a non-final response, keeping the
    /// connection held for the next attempt when it survives.
    async fn discard_attempt_body(&mut self, response: &HeaderTable) -> Result<(), NetError> {
        let mut connection = match self.held_connection.take() {
            Some(connection) => connection,
            None => return Ok(()),
        };
        let decoder = TransferDecoder::from_response(&self.method, response)?;
        let drained = tokio::time::timeout(
            self.config.read_timeout,
            drain_body(&mut connection, decoder, self.config.max_response_size),
        )
        .await
        .map_err(|_| NetError::ReadTimedOut)??;
        if drained.connection_reusable && response_allows_reuse(response) {
            self.held_connection = Some(connection);
        }
        Ok(())
    }

    /// A 304 (or an older network copy) confirmed the cached entry: merge
    /// the fresher headers, update the store, and serve the cached body.
    async fn finish_validated(
        &mut self,
        entry: CachedResponse,
        exchange: Exchange,
    ) -> Result<HttpResponse, NetError> {
        debug!(url = %self.url, "cache entry validated");
        self.discard_attempt_body(&exchange.headers).await?;
        if let Some(connection) = self.held_connection.take() {
            self.config.pool.recycle(connection);
        }

        let merged = merge_validated_headers(&entry.headers, &exchange.headers);
        if let Some(cache) = &self.config.cache {
            cache.update(
                &self.url,
                &self.method,
                merged.clone(),
                exchange.sent_millis,
                exchange.received_millis,
            );
        }
        self.load_state.set(LoadState::Idle);
        Ok(HttpResponse::new(merged, entry.body, ResponseSource::ConditionalCache))
    }

    /// Drain the final response body, decode it, store it, and hand the
    /// connection back to the pool.
    async fn finish_network(&mut self, exchange: Exchange) -> Result<HttpResponse, NetError> {
        let mut headers = exchange.headers;
        let mut connection = self
            .held_connection
            .take()
            .ok_or(NetError::SocketNotConnected)?;

        let decoder = TransferDecoder::from_response(&self.method, &headers)?;
        let drained = tokio::time::timeout(
            self.config.read_timeout,
            drain_body(&mut connection, decoder, self.config.max_response_size),
        )
        .await
        .map_err(|_| NetError::ReadTimedOut)??;

        if drained.connection_reusable && response_allows_reuse(&headers) {
            self.config.pool.recycle(connection);
        }

        let mut body = drained.bytes;
        if self.transparent_gzip
            && headers
                .get("Content-Encoding")
                .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
        {
            body = gunzip(&body).await?;
            // The caller sees the decoded entity, so the headers describing
            // the compressed form go away.
            headers.remove_all("Content-Encoding");
            headers.remove_all("Content-Length");
        }

        self.maybe_store(&headers, &body, exchange.sent_millis, exchange.received_millis);
        self.load_state.set(LoadState::Idle);
        Ok(HttpResponse::new(headers, Bytes::from(body), ResponseSource::Network))
    }

    fn maybe_store(
        &self,
        headers: &HeaderTable,
        body: &[u8],
        sent_millis: i64,
        received_millis: i64,
    ) {
        if !is_cacheable_method(&self.method) {
            return;
        }
        let cache = match &self.config.cache {
            Some(cache) => cache,
            None => return,
        };
        let status = match headers.response_code() {
            Ok(status) => status,
            Err(_) => return,
        };
        if !is_cacheable(status) {
            return;
        }
        let mut directives = CacheDirectives::default();
        for value in headers.get_all("Cache-Control") {
            directives.parse_into(value);
        }
        if directives.no_store {
            return;
        }
        if let Some(mut writer) =
            cache.put(&self.url, &self.method, headers, sent_millis, received_millis)
        {
            writer.write(body);
            writer.commit();
            trace!(url = %self.url, bytes = body.len(), "response stored in cache");
        }
    }
}

/// Failures that plausibly mean the pooled connection was dead on arrival
/// rather than the request being at fault.
fn is_stale_failure(error: NetError) -> bool {
    matches!(
        error,
        NetError::ConnectionClosed
            | NetError::ConnectionReset
            | NetError::ConnectionAborted
            | NetError::EmptyResponse
    )
}

/// Keep-alive is the HTTP/1.1 default; a `Connection: close` from the
/// server (or an HTTP/1.0 peer) retires the connection.
fn response_allows_reuse(response: &HeaderTable) -> bool {
    if response.http_minor_version() != 1 {
        return false;
    }
    !response
        .get("Connection")
        .is_some_and(|v| v.eq_ignore_ascii_case("close"))
}

/// Overlay the revalidated response's headers onto the cached entry's,
/// keeping the cached status line and body framing.
fn merge_validated_headers(cached: &HeaderTable, network: &HeaderTable) -> HeaderTable {
    let mut merged = cached.clone();
    for (name, value) in network.iter() {
        if name.is_empty() || name.eq_ignore_ascii_case("Transfer-Encoding") {
            continue;
        }
        merged.set(name, value);
    }
    merged
}
