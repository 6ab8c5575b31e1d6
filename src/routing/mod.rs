//! Rule-based proxy predicate.
//!
//! # Data Flow
//! ```text
//! [[rules]] in config
//!     → router.rs (compile, sort by priority)
//!     → matcher.rs (host / path prefix, AND semantics)
//!     → ProxyDirective::Forward(upstream + path + query) | Skip
//! ```
//!
//! # Design Decisions
//! - First matching rule wins; priority ties keep declaration order
//! - The inbound path and query are forwarded unchanged

pub mod matcher;
pub mod router;

pub use router::{Rule, RouteTable};
