//! Attempt-level retry decisions.
//!
//! After each network exchange the engine hands the response headers to
//! the [`RetryStateMachine`], which decides whether the logical request is
//! done or must be re-sent (after an authentication challenge or a
//! redirect), and whether the same connection can carry the retry.

use crate::base::neterror::NetError;
use crate::http::auth::{parse_challenge, AuthTarget, Authenticator};
use crate::http::headers::HeaderTable;
use crate::socket::proxy::{ProxyChoice, ProxyServer};
use tracing::debug;
use url::Url;

const MAX_REDIRECTS: u32 = 5;

/// Outcome of examining one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The response is final; surface it to the caller.
    None,
    /// Re-send the request; the current connection can carry it.
    SameConnection,
    /// Re-send the request on a fresh connection (origin or route changed).
    NewConnection,
}

/// Mutable request state a retry is allowed to rewrite.
pub struct RetryContext<'a> {
    pub url: &'a mut Url,
    pub method: &'a str,
    pub request_headers: &'a mut HeaderTable,
    pub body_replayable: bool,
    pub follow_redirects: bool,
    pub proxy: &'a mut ProxyChoice,
    pub authenticator: &'a dyn Authenticator,
}

/// Tracks retry progress across the attempts of one logical request.
#[derive(Debug, Default)]
pub struct RetryStateMachine {
    redirect_count: u32,
}

impl RetryStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirect_count(&self) -> u32 {
        self.redirect_count
    }

    /// Examine a response and decide the next step, rewriting the request
    /// state in `ctx` when a retry is warranted.
    pub fn process(
        &mut self,
        response: &HeaderTable,
        ctx: &mut RetryContext<'_>,
    ) -> Result<RetryDecision, NetError> {
        let status = response.response_code()?;
        let decision = match status {
            401 => self.process_challenge(response, ctx, AuthTarget::Origin)?,
            407 => {
                if ctx.proxy.proxy().is_none() {
                    return Err(NetError::UnexpectedProxyAuth);
                }
                self.process_challenge(response, ctx, AuthTarget::Proxy)?
            }
            300 | 301 | 302 | 303 | 305 => self.process_redirect(status, response, ctx)?,
            _ => RetryDecision::None,
        };

        // The server may allow the retry but not on this connection.
        if decision == RetryDecision::SameConnection
            && response
                .get("Connection")
                .is_some_and(|v| v.eq_ignore_ascii_case("close"))
        {
            return Ok(RetryDecision::NewConnection);
        }
        Ok(decision)
    }

    fn process_challenge(
        &mut self,
        response: &HeaderTable,
        ctx: &mut RetryContext<'_>,
        target: AuthTarget,
    ) -> Result<RetryDecision, NetError> {
        let (challenge_header, credentials_header) = match target {
            AuthTarget::Origin => ("WWW-Authenticate", "Authorization"),
            AuthTarget::Proxy => ("Proxy-Authenticate", "Proxy-Authorization"),
        };
        let challenge = response
            .get(challenge_header)
            .and_then(parse_challenge)
            .ok_or(NetError::MissingAuthChallenge)?;

        let (host, port) = match (target, ctx.proxy.proxy()) {
            (AuthTarget::Proxy, Some(proxy)) => (proxy.host.clone(), proxy.port),
            _ => (
                ctx.url.host_str().unwrap_or_default().to_string(),
                effective_port(ctx.url),
            ),
        };

        let credentials = match ctx.authenticator.credentials(&host, port, target, &challenge) {
            Some(credentials) => credentials,
            None => return Ok(RetryDecision::None),
        };
        if !ctx.body_replayable {
            return Err(NetError::CannotRetryStreamedBody);
        }

        debug!(%host, port, realm = %challenge.realm, "retrying with credentials");
        ctx.request_headers
            .set(credentials_header, credentials.to_basic_header());
        Ok(RetryDecision::SameConnection)
    }

    fn process_redirect(
        &mut self,
        status: u16,
        response: &HeaderTable,
        ctx: &mut RetryContext<'_>,
    ) -> Result<RetryDecision, NetError> {
        if !ctx.follow_redirects || !ctx.body_replayable {
            return Ok(RetryDecision::None);
        }
        let location = match response.get("Location") {
            Some(location) => location.to_string(),
            None => return Ok(RetryDecision::None),
        };

        self.redirect_count += 1;
        if self.redirect_count > MAX_REDIRECTS {
            return Err(NetError::TooManyRedirects);
        }

        if status == 305 {
            // The Location of a 305 names a proxy, not a new resource.
            let proxy = ProxyServer::parse(&location).ok_or(NetError::InvalidUrl)?;
            debug!(%proxy, "redirected through proxy");
            *ctx.proxy = ProxyChoice::Proxy(proxy);
            return Ok(RetryDecision::NewConnection);
        }

        let target = ctx.url.join(&location).map_err(|_| NetError::InvalidUrl)?;
        if target.scheme() != ctx.url.scheme() {
            // Crossing between cleartext and TLS is never done silently.
            return Ok(RetryDecision::None);
        }

        let same_origin = target.host_str() == ctx.url.host_str()
            && effective_port(&target) == effective_port(ctx.url);
        debug!(from = %ctx.url, to = %target, same_origin, "following redirect");

        *ctx.url = target;
        if same_origin {
            Ok(RetryDecision::SameConnection)
        } else {
            // A caller-supplied Host override must not leak cross-origin.
            ctx.request_headers.remove_all("Host");
            Ok(RetryDecision::NewConnection)
        }
    }
}

/// Port with scheme defaults applied (80 for http, 443 for https).
pub fn effective_port(url: &Url) -> u16 {
    url.port_or_known_default().unwrap_or(80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::auth::{Challenge, Credentials, NoAuth};

    struct FixedAuth;

    impl Authenticator for FixedAuth {
        fn credentials(
            &self,
            _: &str,
            _: u16,
            _: AuthTarget,
            _: &Challenge,
        ) -> Option<Credentials> {
            Some(Credentials::new("user", "pass"))
        }
    }

    struct TestRequest {
        url: Url,
        headers: HeaderTable,
        proxy: ProxyChoice,
    }

    impl TestRequest {
        fn new(url: &str) -> Self {
            Self {
                url: Url::parse(url).unwrap(),
                headers: HeaderTable::new(),
                proxy: ProxyChoice::Direct,
            }
        }

        fn ctx<'a>(&'a mut self, authenticator: &'a dyn Authenticator) -> RetryContext<'a> {
            RetryContext {
                url: &mut self.url,
                method: "GET",
                request_headers: &mut self.headers,
                body_replayable: true,
                follow_redirects: true,
                proxy: &mut self.proxy,
                authenticator,
            }
        }
    }

    fn response(status_line: &str, pairs: &[(&str, &str)]) -> HeaderTable {
        let mut headers = HeaderTable::new();
        headers.set_status_line(status_line);
        for (name, value) in pairs {
            headers.add(name, *value);
        }
        headers
    }

    #[test]
    fn test_success_is_final() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        let decision = machine
            .process(&response("HTTP/1.1 200 OK", &[]), &mut request.ctx(&NoAuth))
            .unwrap();
        assert_eq!(decision, RetryDecision::None);
    }

    #[test]
    fn test_401_with_credentials_retries_same_connection() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        let decision = machine
            .process(
                &response("HTTP/1.1 401 Unauthorized", &[("WWW-Authenticate", "Basic realm=\"r\"")]),
                &mut request.ctx(&FixedAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::SameConnection);
        assert_eq!(request.headers.get("Authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_401_without_credentials_is_final() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        let decision = machine
            .process(
                &response("HTTP/1.1 401 Unauthorized", &[("WWW-Authenticate", "Basic realm=\"r\"")]),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::None);
    }

    #[test]
    fn test_401_without_challenge_is_error() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        let result = machine.process(
            &response("HTTP/1.1 401 Unauthorized", &[]),
            &mut request.ctx(&FixedAuth),
        );
        assert_eq!(result.unwrap_err(), NetError::MissingAuthChallenge);
    }

    #[test]
    fn test_401_streamed_body_cannot_retry() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        let mut ctx = request.ctx(&FixedAuth);
        ctx.body_replayable = false;
        let result = machine.process(
            &response("HTTP/1.1 401 Unauthorized", &[("WWW-Authenticate", "Basic realm=\"r\"")]),
            &mut ctx,
        );
        assert_eq!(result.unwrap_err(), NetError::CannotRetryStreamedBody);
    }

    #[test]
    fn test_407_without_proxy_is_error() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        let result = machine.process(
            &response("HTTP/1.1 407 Proxy Authentication Required", &[]),
            &mut request.ctx(&FixedAuth),
        );
        assert_eq!(result.unwrap_err(), NetError::UnexpectedProxyAuth);
    }

    #[test]
    fn test_407_through_proxy_sets_proxy_authorization() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/");
        request.proxy = ProxyChoice::Proxy(ProxyServer::new("proxy", 3128));
        let decision = machine
            .process(
                &response(
                    "HTTP/1.1 407 Proxy Authentication Required",
                    &[("Proxy-Authenticate", "Basic realm=\"p\"")],
                ),
                &mut request.ctx(&FixedAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::SameConnection);
        assert!(request.headers.get("Proxy-Authorization").is_some());
    }

    #[test]
    fn test_same_origin_redirect_reuses_connection() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let decision = machine
            .process(
                &response("HTTP/1.1 302 Found", &[("Location", "/b")]),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::SameConnection);
        assert_eq!(request.url.as_str(), "http://example.com/b");
    }

    #[test]
    fn test_cross_origin_redirect_needs_new_connection() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        request.headers.set("Host", "override.example.com");
        let decision = machine
            .process(
                &response("HTTP/1.1 301 Moved Permanently", &[("Location", "http://other.com/")]),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::NewConnection);
        assert_eq!(request.url.as_str(), "http://other.com/");
        assert!(request.headers.get("Host").is_none());
    }

    #[test]
    fn test_explicit_default_port_is_same_origin() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let decision = machine
            .process(
                &response("HTTP/1.1 302 Found", &[("Location", "http://example.com:80/b")]),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::SameConnection);
    }

    #[test]
    fn test_scheme_change_not_followed() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let decision = machine
            .process(
                &response("HTTP/1.1 302 Found", &[("Location", "https://example.com/b")]),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::None);
        assert_eq!(request.url.as_str(), "http://example.com/a");
    }

    #[test]
    fn test_redirects_disabled() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let mut ctx = request.ctx(&NoAuth);
        ctx.follow_redirects = false;
        let decision = machine
            .process(&response("HTTP/1.1 302 Found", &[("Location", "/b")]), &mut ctx)
            .unwrap();
        assert_eq!(decision, RetryDecision::None);
    }

    #[test]
    fn test_redirect_limit() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let redirect = response("HTTP/1.1 302 Found", &[("Location", "/loop")]);
        for _ in 0..5 {
            let decision = machine
                .process(&redirect, &mut request.ctx(&NoAuth))
                .unwrap();
            assert_eq!(decision, RetryDecision::SameConnection);
        }
        let result = machine.process(&redirect, &mut request.ctx(&NoAuth));
        assert_eq!(result.unwrap_err(), NetError::TooManyRedirects);
    }

    #[test]
    fn test_use_proxy_redirect() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let decision = machine
            .process(
                &response("HTTP/1.1 305 Use Proxy", &[("Location", "proxy.example.com:3128")]),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::NewConnection);
        assert_eq!(
            request.proxy,
            ProxyChoice::Proxy(ProxyServer::new("proxy.example.com", 3128))
        );
        // The request URL is unchanged; only the route moved.
        assert_eq!(request.url.as_str(), "http://example.com/a");
    }

    #[test]
    fn test_connection_close_upgrades_to_new_connection() {
        let mut machine = RetryStateMachine::new();
        let mut request = TestRequest::new("http://example.com/a");
        let decision = machine
            .process(
                &response(
                    "HTTP/1.1 302 Found",
                    &[("Location", "/b"), ("Connection", "close")],
                ),
                &mut request.ctx(&NoAuth),
            )
            .unwrap();
        assert_eq!(decision, RetryDecision::NewConnection);
    }
}
