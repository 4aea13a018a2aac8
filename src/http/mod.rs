//! HTTP/1.1 semantics: headers, caching, bodies, and the request engine.

pub mod auth;
pub mod body;
pub mod cache;
pub mod cachecontrol;
pub mod cachepolicy;
pub mod cookies;
pub mod date;
pub mod engine;
pub mod headers;
pub mod response;
pub mod retry;

pub use auth::{AuthTarget, Authenticator, Challenge, Credentials};
pub use body::RequestBody;
pub use cache::{CachedResponse, CacheWriter, MemoryCache, ResponseCache};
pub use cachepolicy::ResponseSource;
pub use cookies::CookieStore;
pub use engine::{Request, RequestEngine};
pub use headers::HeaderTable;
pub use response::HttpResponse;
pub use retry::{RetryDecision, RetryStateMachine};
