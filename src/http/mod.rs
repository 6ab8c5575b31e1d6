//! HTTP plumbing around the proxy engine.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → server.rs (request ID, timeout, trace, proxy middleware)
//!     → request.rs (destination parsing, outbound request, body replay)
//!     → headers.rs (hop-by-hop filtering)
//!     → response.rs (ProxyResponse → axum Response)
//! ```

pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use request::OutboundRequestSpec;
pub use response::ProxyResponse;
pub use server::HttpServer;
