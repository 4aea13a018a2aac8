//! Cache decision logic for stored responses.
//!
//! Implements the RFC 2616 §13 age and freshness arithmetic: given a cached
//! response's metadata and the current request, decide whether to answer
//! from the cache, go to the network, or issue a conditional GET carrying
//! validators.

use crate::http::cachecontrol::CacheDirectives;
use crate::http::date::{format_http_date, parse_http_date, unix_millis};
use crate::http::headers::HeaderTable;
use time::OffsetDateTime;

/// Where a logical request attempt will be satisfied from. Decided once per
/// attempt; immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fetch from the origin, ignoring any cached entry.
    Network,
    /// Serve the cached response without touching the network.
    Cache,
    /// Send a conditional request; a 304 promotes the cached response.
    ConditionalCache,
}

impl ResponseSource {
    pub fn requires_network(self) -> bool {
        !matches!(self, ResponseSource::Cache)
    }
}

/// Response codes that may be cached at all. Partial content (206) is
/// deliberately excluded: this cache doesn't store ranges.
pub fn is_cacheable(status: u16) -> bool {
    matches!(status, 200 | 203 | 300 | 301 | 410)
}

/// Methods whose responses may be cached or served from cache. Only GET
/// participates; every other method always goes to the network.
pub fn is_cacheable_method(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET")
}

/// Caching-relevant fields of the *request*, parsed from the outgoing
/// header table.
#[derive(Debug, Clone, Default)]
pub struct RequestDirectives {
    pub no_cache: bool,
    pub max_age_seconds: Option<u32>,
    pub max_stale_seconds: Option<u32>,
    pub min_fresh_seconds: Option<u32>,
    pub only_if_cached: bool,
    /// True when the caller already attached `If-None-Match` or
    /// `If-Modified-Since`; the cache then stays out of the request.
    pub has_conditions: bool,
    pub has_authorization: bool,
}

impl RequestDirectives {
    pub fn from_headers(headers: &HeaderTable) -> Self {
        let mut directives = CacheDirectives::default();
        for value in headers.get_all("Cache-Control") {
            directives.parse_into(value);
        }
        let pragma_no_cache = headers
            .get_all("Pragma")
            .iter()
            .any(|v| v.eq_ignore_ascii_case("no-cache"));

        Self {
            no_cache: directives.no_cache || pragma_no_cache,
            max_age_seconds: directives.max_age_seconds,
            max_stale_seconds: directives.max_stale_seconds,
            min_fresh_seconds: directives.min_fresh_seconds,
            only_if_cached: directives.only_if_cached,
            has_conditions: headers.get("If-None-Match").is_some()
                || headers.get("If-Modified-Since").is_some(),
            has_authorization: headers.get("Authorization").is_some(),
        }
    }
}

/// Caching-relevant fields derived from a response's header table, plus the
/// local send/receive timestamps of the exchange that produced it.
///
/// Built once per response and never mutated; revalidation constructs a
/// fresh instance from the revalidated headers.
#[derive(Debug, Clone)]
pub struct CacheMetadata {
    status: u16,
    directives: CacheDirectives,
    served_date: Option<OffsetDateTime>,
    last_modified: Option<OffsetDateTime>,
    expires: Option<OffsetDateTime>,
    etag: Option<String>,
    age_seconds: Option<u32>,
    sent_millis: i64,
    received_millis: i64,
}

impl CacheMetadata {
    pub fn from_response(headers: &HeaderTable, sent_millis: i64, received_millis: i64) -> Self {
        let mut directives = CacheDirectives::default();
        for value in headers.get_all("Cache-Control") {
            directives.parse_into(value);
        }
        if headers
            .get_all("Pragma")
            .iter()
            .any(|v| v.eq_ignore_ascii_case("no-cache"))
        {
            directives.no_cache = true;
        }

        Self {
            status: headers.response_code().unwrap_or(0),
            directives,
            served_date: headers.get("Date").and_then(parse_http_date),
            last_modified: headers.get("Last-Modified").and_then(parse_http_date),
            expires: headers.get("Expires").and_then(parse_http_date),
            etag: headers.get("ETag").map(str::to_string),
            age_seconds: headers.get("Age").and_then(|v| v.trim().parse().ok()),
            sent_millis,
            received_millis,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_modified(&self) -> Option<OffsetDateTime> {
        self.last_modified
    }

    /// Current age of the response in milliseconds (RFC 2616 §13.2.3).
    fn compute_age(&self, now_millis: i64) -> i64 {
        let apparent_received_age = match self.served_date {
            Some(served) => (self.received_millis - unix_millis(served)).max(0),
            None => 0,
        };
        let received_age = match self.age_seconds {
            Some(age) => apparent_received_age.max(age as i64 * 1000),
            None => apparent_received_age,
        };
        let response_duration = self.received_millis - self.sent_millis;
        let resident_duration = now_millis - self.received_millis;
        received_age + response_duration + resident_duration
    }

    /// How long the response stays fresh, in milliseconds from the served
    /// date: `max-age` if present, else `Expires - Date` clamped to ≥ 0,
    /// else zero.
    fn compute_freshness_lifetime(&self) -> i64 {
        if let Some(max_age) = self.directives.max_age_seconds {
            return max_age as i64 * 1000;
        }
        if let Some(expires) = self.expires {
            let served_millis = self
                .served_date
                .map(unix_millis)
                .unwrap_or(self.received_millis);
            return (unix_millis(expires) - served_millis).max(0);
        }
        0
    }

    /// Decide how to satisfy the current request given this cached
    /// response.
    ///
    /// When revalidation is required this *mutates the outgoing header
    /// table*, attaching `If-Modified-Since` and/or `If-None-Match`: the
    /// physical request sent to the network deliberately differs from the
    /// logical request.
    pub fn choose_response_source(
        &self,
        now_millis: i64,
        request_headers: &mut HeaderTable,
    ) -> ResponseSource {
        let request = RequestDirectives::from_headers(request_headers);

        if self.directives.no_store
            || request.no_cache
            || request.has_conditions
            || !is_cacheable(self.status)
        {
            return ResponseSource::Network;
        }

        let age_millis = self.compute_age(now_millis);
        let mut fresh_millis = self.compute_freshness_lifetime();

        if let Some(request_max_age) = request.max_age_seconds {
            fresh_millis = fresh_millis.min(request_max_age as i64 * 1000);
        }

        let min_fresh_millis = request.min_fresh_seconds.unwrap_or(0) as i64 * 1000;
        let max_stale_millis = request.max_stale_seconds.unwrap_or(0) as i64 * 1000;

        if !self.directives.no_cache
            && age_millis + min_fresh_millis < fresh_millis + max_stale_millis
        {
            return ResponseSource::Cache;
        }

        let mut attached_conditions = false;
        if let Some(last_modified) = self.last_modified {
            request_headers.add("If-Modified-Since", format_http_date(last_modified));
            attached_conditions = true;
        } else if let Some(served) = self.served_date {
            request_headers.add("If-Modified-Since", format_http_date(served));
            attached_conditions = true;
        }
        if let Some(etag) = &self.etag {
            request_headers.add("If-None-Match", etag.clone());
            attached_conditions = true;
        }

        if attached_conditions {
            ResponseSource::ConditionalCache
        } else {
            ResponseSource::Network
        }
    }

    /// After a conditional request, returns true if the cached body should
    /// be served and false if the network response replaces it.
    ///
    /// A 304 always validates. Beyond that, this client keeps the
    /// prefer-newest policy: when the network response carries an *older*
    /// `Last-Modified` than the cached one, the cached response wins, even
    /// though strict HTTP semantics would let either be returned.
    pub fn validate(&self, network_response: &HeaderTable) -> bool {
        if network_response.response_code() == Ok(304) {
            return true;
        }

        if let Some(cached_last_modified) = self.last_modified {
            let network_last_modified =
                network_response.get("Last-Modified").and_then(parse_http_date);
            if let Some(network_last_modified) = network_last_modified {
                if network_last_modified < cached_last_modified {
                    return true;
                }
            }
        }

        false
    }
}
