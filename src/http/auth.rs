//! Origin and proxy authentication.
//!
//! Credentials come from a caller-supplied [`Authenticator`]; the engine
//! consults it when a 401 or 407 arrives and retries with the rendered
//! `Authorization` / `Proxy-Authorization` header. A small concurrent
//! cache avoids re-asking for the same protection space.

use base64::{engine::general_purpose, Engine as _};
use dashmap::DashMap;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Whether a challenge protects the origin server or an intermediary proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTarget {
    Origin,
    Proxy,
}

/// A username/password pair. The password is wiped from memory when the
/// credentials are dropped.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: Zeroizing::new(password.into()) }
    }

    /// Render the `Basic` credentials header value.
    pub fn to_basic_header(&self) -> String {
        let pair = Zeroizing::new(format!("{}:{}", self.username, *self.password));
        format!("Basic {}", general_purpose::STANDARD.encode(pair.as_bytes()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A parsed authentication challenge from a `WWW-Authenticate` or
/// `Proxy-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub realm: String,
}

/// Parse the first challenge out of a header value like
/// `Basic realm="files", charset="UTF-8"`. Returns `None` when no scheme
/// token is present.
pub fn parse_challenge(value: &str) -> Option<Challenge> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (scheme, params) = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest),
        None => (value, ""),
    };

    let mut realm = String::new();
    for param in params.split(',') {
        if let Some((name, raw)) = param.split_once('=') {
            if name.trim().eq_ignore_ascii_case("realm") {
                realm = raw.trim().trim_matches('"').to_string();
            }
        }
    }

    Some(Challenge { scheme: scheme.to_string(), realm })
}

/// Source of credentials for authentication challenges.
///
/// Returning `None` means the challenge goes unanswered and the 401/407
/// response is surfaced to the caller as-is.
pub trait Authenticator: Send + Sync {
    fn credentials(
        &self,
        host: &str,
        port: u16,
        target: AuthTarget,
        challenge: &Challenge,
    ) -> Option<Credentials>;
}

/// An [`Authenticator`] that never answers. The default.
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn credentials(&self, _: &str, _: u16, _: AuthTarget, _: &Challenge) -> Option<Credentials> {
        None
    }
}

/// Thread-safe credential cache keyed by `host:port:realm`, wrapping an
/// inner [`Authenticator`] that is consulted on miss.
#[derive(Clone)]
pub struct CredentialCache {
    inner: Arc<dyn Authenticator>,
    entries: Arc<DashMap<String, Credentials>>,
}

impl CredentialCache {
    pub fn new(inner: Arc<dyn Authenticator>) -> Self {
        Self { inner, entries: Arc::new(DashMap::new()) }
    }

    fn key(host: &str, port: u16, realm: &str) -> String {
        format!("{}:{}:{}", host.to_lowercase(), port, realm)
    }

    /// Drop the entry for a protection space, after a rejected retry.
    pub fn evict(&self, host: &str, port: u16, realm: &str) {
        self.entries.remove(&Self::key(host, port, realm));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Authenticator for CredentialCache {
    fn credentials(
        &self,
        host: &str,
        port: u16,
        target: AuthTarget,
        challenge: &Challenge,
    ) -> Option<Credentials> {
        let key = Self::key(host, port, &challenge.realm);
        if let Some(cached) = self.entries.get(&key) {
            return Some(cached.clone());
        }
        let credentials = self.inner.credentials(host, port, target, challenge)?;
        self.entries.insert(key, credentials.clone());
        Some(credentials)
    }
}
