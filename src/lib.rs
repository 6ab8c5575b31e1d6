//! Selective streaming reverse proxy.
//!
//! Per request, a predicate either lets the request through to the host
//! application or names a destination. Proxied requests run in a worker task
//! that streams the upstream response back over a framed in-memory channel;
//! the caller gets status and headers up front and pulls the body lazily.

pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod routing;
pub mod worker;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, Result};
pub use http::{HttpServer, ProxyResponse};
pub use lifecycle::Shutdown;
pub use proxy::{streaming_proxy_middleware, ProxyDirective, ProxyPredicate, ResponseBody, StreamingProxy};
pub use routing::RouteTable;
