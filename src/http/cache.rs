//! Response cache storage.
//!
//! The engine talks to storage through the [`ResponseCache`] trait; the
//! freshness decisions live in [`crate::http::cachepolicy`]. Writing is
//! two-phase: the engine streams body bytes into a [`CacheWriter`] and
//! commits only after the body completed cleanly, so a truncated transfer
//! never becomes a cache entry.

use crate::http::headers::HeaderTable;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// A complete cached exchange: response headers, body, and the local
/// timestamps of the request that produced it (needed for age arithmetic).
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub headers: HeaderTable,
    pub body: Bytes,
    pub sent_millis: i64,
    pub received_millis: i64,
}

/// Sink for an in-flight response body destined for the cache.
///
/// `commit` publishes the entry; `abort` (or dropping the writer without
/// committing) abandons it. Partial writes are never observable to
/// readers.
pub trait CacheWriter: Send {
    fn write(&mut self, chunk: &[u8]);
    fn commit(self: Box<Self>);

    /// Discard everything written so far. Implementations holding external
    /// resources (an open file, a temp entry) clean them up here.
    fn abort(self: Box<Self>) {}
}

/// Pluggable response cache.
///
/// Implementations must tolerate concurrent readers and writers; when two
/// writers race on one key, either entry may win but a mixture must not.
pub trait ResponseCache: Send + Sync {
    /// Look up the stored exchange for a request, fresh or stale.
    fn get(&self, url: &Url, method: &str) -> Option<CachedResponse>;

    /// Begin storing a response. Returns `None` to decline (uncacheable
    /// method, storage full, and so on).
    fn put(
        &self,
        url: &Url,
        method: &str,
        headers: &HeaderTable,
        sent_millis: i64,
        received_millis: i64,
    ) -> Option<Box<dyn CacheWriter>>;

    /// Replace a revalidated entry's metadata after a 304, keeping its body.
    fn update(&self, url: &Url, method: &str, headers: HeaderTable, sent_millis: i64, received_millis: i64);

    /// Drop the entry for a request, if any.
    fn remove(&self, url: &Url, method: &str);
}

/// Cache key: fragmentless URL plus method.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    url: String,
    method: String,
}

impl CacheKey {
    fn new(url: &Url, method: &str) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self { url: url.into(), method: method.to_uppercase() }
    }
}

/// In-memory [`ResponseCache`] backed by a concurrent map, with entry-count
/// and byte-size limits and oldest-first eviction.
pub struct MemoryCache {
    entries: Arc<DashMap<CacheKey, CachedResponse>>,
    max_entries: usize,
    max_size_bytes: usize,
    current_size: Arc<AtomicUsize>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_limits(1000, 50 * 1024 * 1024)
    }

    pub fn with_limits(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries,
            max_size_bytes,
            current_size: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }
}

// Oldest-received entry goes first. Returns false once the map is empty.
fn evict_oldest(
    entries: &DashMap<CacheKey, CachedResponse>,
    current_size: &AtomicUsize,
) -> bool {
    let victim = entries
        .iter()
        .min_by_key(|e| e.value().received_millis)
        .map(|e| e.key().clone());
    match victim {
        Some(key) => {
            if let Some((_, entry)) = entries.remove(&key) {
                current_size.fetch_sub(entry.body.len(), Ordering::Relaxed);
            }
            true
        }
        None => false,
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, url: &Url, method: &str) -> Option<CachedResponse> {
        self.entries.get(&CacheKey::new(url, method)).map(|e| e.clone())
    }

    fn put(
        &self,
        url: &Url,
        method: &str,
        headers: &HeaderTable,
        sent_millis: i64,
        received_millis: i64,
    ) -> Option<Box<dyn CacheWriter>> {
        let method = method.to_uppercase();
        if method != "GET" {
            return None;
        }
        Some(Box::new(MemoryCacheWriter {
            entries: Arc::clone(&self.entries),
            current_size: Arc::clone(&self.current_size),
            max_entries: self.max_entries,
            max_size_bytes: self.max_size_bytes,
            key: CacheKey::new(url, &method),
            headers: headers.clone(),
            body: Vec::new(),
            sent_millis,
            received_millis,
        }))
    }

    fn update(
        &self,
        url: &Url,
        method: &str,
        headers: HeaderTable,
        sent_millis: i64,
        received_millis: i64,
    ) {
        let key = CacheKey::new(url, method);
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.headers = headers;
            entry.sent_millis = sent_millis;
            entry.received_millis = received_millis;
        }
    }

    fn remove(&self, url: &Url, method: &str) {
        if let Some((_, entry)) = self.entries.remove(&CacheKey::new(url, method)) {
            self.current_size.fetch_sub(entry.body.len(), Ordering::Relaxed);
        }
    }
}

// The writer can't hold `&MemoryCache` (it outlives the borrow), so it
// carries the shared map plus the limits it must honor at commit.
struct MemoryCacheWriter {
    entries: Arc<DashMap<CacheKey, CachedResponse>>,
    current_size: Arc<AtomicUsize>,
    max_entries: usize,
    max_size_bytes: usize,
    key: CacheKey,
    headers: HeaderTable,
    body: Vec<u8>,
    sent_millis: i64,
    received_millis: i64,
}

impl CacheWriter for MemoryCacheWriter {
    fn write(&mut self, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
    }

    fn commit(self: Box<Self>) {
        // A body too large to ever fit is dropped rather than evicting the
        // whole cache to make room.
        if self.body.len() > self.max_size_bytes {
            return;
        }
        while self.entries.len() >= self.max_entries
            || self.current_size.load(Ordering::Relaxed) + self.body.len() > self.max_size_bytes
        {
            if !evict_oldest(&self.entries, &self.current_size) {
                break;
            }
        }
        let entry = CachedResponse {
            headers: self.headers,
            body: Bytes::from(self.body),
            sent_millis: self.sent_millis,
            received_millis: self.received_millis,
        };
        self.current_size.fetch_add(entry.body.len(), Ordering::Relaxed);
        if let Some(old) = self.entries.insert(self.key, entry) {
            self.current_size.fetch_sub(old.body.len(), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_headers() -> HeaderTable {
        let mut headers = HeaderTable::new();
        headers.set_status_line("HTTP/1.1 200 OK");
        headers.add("Cache-Control", "max-age=60");
        headers
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_put_commit_get() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");

        let mut writer = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        writer.write(b"hello ");
        writer.write(b"world");
        writer.commit();

        let entry = cache.get(&u, "GET").unwrap();
        assert_eq!(&entry.body[..], b"hello world");
        assert_eq!(entry.sent_millis, 1);
        assert_eq!(entry.received_millis, 2);
    }

    #[test]
    fn test_abandoned_writer_stores_nothing() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");

        let mut writer = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        writer.write(b"partial");
        drop(writer);

        assert!(cache.get(&u, "GET").is_none());
    }

    #[test]
    fn test_aborted_writer_stores_nothing() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");

        let mut writer = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        writer.write(b"partial");
        writer.abort();

        assert!(cache.get(&u, "GET").is_none());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_non_get_declined() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");
        assert!(cache.put(&u, "POST", &ok_headers(), 1, 2).is_none());
    }

    #[test]
    fn test_fragment_stripped_from_key() {
        let cache = MemoryCache::new();
        let mut writer = cache
            .put(&url("http://example.com/a#section"), "GET", &ok_headers(), 1, 2)
            .unwrap();
        writer.write(b"body");
        writer.commit();

        assert!(cache.get(&url("http://example.com/a"), "GET").is_some());
        assert!(cache.get(&url("http://example.com/a#other"), "GET").is_some());
    }

    #[test]
    fn test_update_replaces_headers_keeps_body() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");

        let mut writer = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        writer.write(b"body");
        writer.commit();

        let mut fresh = ok_headers();
        fresh.set("Cache-Control", "max-age=3600");
        cache.update(&u, "GET", fresh, 10, 20);

        let entry = cache.get(&u, "GET").unwrap();
        assert_eq!(&entry.body[..], b"body");
        assert_eq!(entry.headers.get("Cache-Control"), Some("max-age=3600"));
        assert_eq!(entry.received_millis, 20);
    }

    #[test]
    fn test_remove() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");

        let mut writer = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        writer.write(b"body");
        writer.commit();
        assert_eq!(cache.len(), 1);

        cache.remove(&u, "GET");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_commit_wins() {
        let cache = MemoryCache::new();
        let u = url("http://example.com/a");

        let mut first = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        let mut second = cache.put(&u, "GET", &ok_headers(), 3, 4).unwrap();
        first.write(b"first");
        second.write(b"second");
        first.commit();
        second.commit();

        let entry = cache.get(&u, "GET").unwrap();
        assert_eq!(&entry.body[..], b"second");
    }

    #[test]
    fn test_oversized_body_not_committed() {
        let cache = MemoryCache::with_limits(10, 8);
        let u = url("http://example.com/a");

        let mut writer = cache.put(&u, "GET", &ok_headers(), 1, 2).unwrap();
        writer.write(b"way more than eight bytes");
        writer.commit();

        assert!(cache.get(&u, "GET").is_none());
    }
}
