//! Worker-to-supervisor channel subsystem.
//!
//! # Data Flow
//! ```text
//! worker task
//!     → message.rs (ChannelMessage, one per protocol step)
//!     → codec.rs (FrameWriter: tag + u32 length + payload)
//!     → tokio::io::duplex pipe (bounded, backpressured)
//!     → codec.rs (FrameReader: buffered, whole frames only)
//!     → proxy::reader (ResponseReader state machine)
//! ```
//!
//! # Design Decisions
//! - Single producer, single consumer; no locking beyond the pipe itself
//! - Length-prefixed binary frames; body chunks are never line-delimited
//! - Writes carry a deadline so a vanished reader cannot pin a worker

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode, encode, FrameReader, FrameWriter, DEFAULT_MAX_FRAME, HEADER_SIZE, MAX_HEADERS_FRAME};
pub use error::{ProtocolViolation, SendError};
pub use message::ChannelMessage;
