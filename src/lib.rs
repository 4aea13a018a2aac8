//! # netfetch
//!
//! An HTTP/1.1 client engine for Rust.
//!
//! `netfetch` implements the hard parts of an HTTP client: connection
//! pooling and reuse, a conditional-response cache with RFC 2616 §13
//! semantics, and a retry state machine that transparently recovers from
//! authentication challenges, redirects, and closed connections.
//!
//! ## Features
//!
//! - **Connection Pooling**: idle connections keyed by (host, port, proxy,
//!   tunnel), probed for liveness before reuse
//! - **Response Caching**: freshness/age arithmetic, conditional GETs with
//!   `If-Modified-Since`/`If-None-Match`, 304 revalidation
//! - **Transparent Retries**: 401/407 challenges answered from an injected
//!   authenticator, redirects followed up to 5 hops, `Connection: close`
//!   recovery
//! - **Proxy Support**: HTTP proxies with CONNECT tunneling and a pluggable
//!   proxy selector
//! - **Transfer Codecs**: chunked, fixed-length, and read-until-close bodies
//!   with transparent gzip decompression
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netfetch::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder().build();
//!     let response = client.get("http://example.com").send().await.unwrap();
//!     println!("Status: {}", response.status());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Core types and error definitions
//! - [`http`] - Headers, caching, bodies, the request engine, and retries
//! - [`socket`] - Connection pooling, transports, and proxies
//!
//! DNS resolution, TLS handshakes, and cookie storage are deliberately not
//! implemented here; they are injected through collaborator traits
//! ([`socket::connection::Transport`], [`http::cookies::CookieStore`], and
//! friends).

pub mod base;
pub mod client;
pub mod http;
pub mod socket;

pub use base::neterror::NetError;
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use http::headers::HeaderTable;
pub use http::response::HttpResponse;
