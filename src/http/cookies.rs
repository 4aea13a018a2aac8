//! Cookie store integration point.
//!
//! The engine asks the store for `Cookie` headers before each network
//! attempt and hands every received response's headers back for storage.
//! No parsing happens here; policy lives entirely in the implementation.

use crate::http::headers::HeaderTable;
use url::Url;

/// Caller-supplied cookie jar.
pub trait CookieStore: Send + Sync {
    /// `Cookie` header values to attach to a request for `url`. The
    /// headers already on the request are provided so stores can defer to
    /// caller-managed cookies.
    fn load(&self, url: &Url, request_headers: &HeaderTable) -> Vec<String>;

    /// Observe response headers (`Set-Cookie` and friends) for `url`.
    fn store(&self, url: &Url, response_headers: &HeaderTable);
}

/// A [`CookieStore`] that stores nothing and sends nothing. The default.
pub struct NoCookies;

impl CookieStore for NoCookies {
    fn load(&self, _url: &Url, _request_headers: &HeaderTable) -> Vec<String> {
        Vec::new()
    }

    fn store(&self, _url: &Url, _response_headers: &HeaderTable) {}
}
