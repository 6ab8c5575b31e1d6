//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt fails in ResponseReader::receive
//!     → retries.rs (retryable? attempts left? how long to wait?)
//!     → StreamingProxy spawns a fresh worker for the next attempt
//! ```
//!
//! # Design Decisions
//! - Timeouts live with the code that awaits (worker connect/response,
//!   channel writes, host request timeout layer)
//! - Retry decisions are pure so the dispatch loop stays readable

pub mod retries;

pub use retries::RetryPolicy;
