//! Proxy engine.
//!
//! # Data Flow
//! ```text
//! inbound Request<Body>
//!     → predicate.rs (Skip | Forward(uri))
//!     → middleware.rs (pass through, or spawn attempt + retry loop)
//!     → reader.rs (status, body permission, headers; 5xx policy)
//!     → body.rs (lazy chunks; reaps the worker at the end)
//!     → http::response (ProxyResponse → axum Response)
//! ```

pub mod body;
pub mod middleware;
pub mod predicate;
pub mod reader;

pub use body::{Framing, ResponseBody};
pub use middleware::{streaming_proxy_middleware, StreamingProxy};
pub use predicate::{ProxyDirective, ProxyPredicate};
pub use reader::ResponseReader;
