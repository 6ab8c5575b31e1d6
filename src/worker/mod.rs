//! Worker subsystem.
//!
//! # Data Flow
//! ```text
//! StreamingProxy::spawn_attempt
//!     → tracker.rs (WorkerId, tokio task, WorkerHandle)
//!     → executor.rs (hyper client call → FrameWriter)
//!     → exit; the handle's owner awaits it
//! ```
//!
//! # Design Decisions
//! - One task per attempt; no pool and no global cap
//! - A handle owns its task: waited once, aborted and reaped if dropped
//! - Live/spawned/reaped counters double as the leak check in tests

pub mod executor;
pub mod tracker;

pub use executor::{body_permitted, WorkerError, WorkerExecutor, WorkerOutcome};
pub use tracker::{WorkerHandle, WorkerId, WorkerTracker};
