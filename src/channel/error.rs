//! Channel error types.

use std::time::Duration;
use thiserror::Error;

/// Bytes on the channel do not match the framing or the message order.
///
/// Always a bug or a dead worker, never an upstream condition.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("unknown frame tag {0:#04x}")]
    UnknownTag(u8),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed {kind} frame: {reason}")]
    Malformed {
        kind: &'static str,
        reason: &'static str,
    },

    #[error("channel closed in the middle of a frame")]
    TruncatedFrame,

    #[error("channel closed while expecting {expected}")]
    UnexpectedEof { expected: &'static str },

    #[error("expected {expected} but received {found}")]
    UnexpectedMessage {
        expected: &'static str,
        found: &'static str,
    },

    #[error("channel read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A worker could not put a frame on the channel.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("channel closed by reader: {0}")]
    Closed(#[from] std::io::Error),

    #[error("channel write did not complete within {0:?}")]
    TimedOut(Duration),
}
