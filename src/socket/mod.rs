//! Connection establishment, pooling and proxy routing.

pub mod connection;
pub mod pool;
pub mod proxy;

pub use connection::{Address, PooledConnection, Stream, TcpTransport, Transport, TransportStream};
pub use pool::ConnectionPool;
pub use proxy::{DirectSelector, EnvProxySelector, FixedProxySelector, ProxyChoice, ProxySelector, ProxyServer};
