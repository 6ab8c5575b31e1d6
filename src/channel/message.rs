//! Messages carried over the worker channel.

use axum::http::HeaderMap;
use bytes::Bytes;

/// One step of an upstream response as seen by the supervisor.
///
/// A worker writes, in order: `Status`, `BodyPermitted`, `Headers`, then
/// (only when the body is permitted) any number of `BodyChunk` and one
/// `Done`. `NoStatus` replaces the whole sequence when the upstream never
/// produced a status line.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Upstream status code.
    Status(u16),
    /// The worker gave up before obtaining any status line.
    NoStatus,
    /// Whether a body follows for this method/status combination.
    BodyPermitted(bool),
    /// Upstream response headers, order and repeats preserved.
    Headers(HeaderMap),
    /// A slice of the decoded upstream body.
    BodyChunk(Bytes),
    /// End of body.
    Done,
}

impl ChannelMessage {
    pub(crate) const TAG_STATUS: u8 = 0x01;
    pub(crate) const TAG_NO_STATUS: u8 = 0x02;
    pub(crate) const TAG_BODY_PERMITTED: u8 = 0x03;
    pub(crate) const TAG_HEADERS: u8 = 0x04;
    pub(crate) const TAG_BODY_CHUNK: u8 = 0x05;
    pub(crate) const TAG_DONE: u8 = 0x06;

    /// Wire tag for this message.
    pub fn tag(&self) -> u8 {
        match self {
            ChannelMessage::Status(_) => Self::TAG_STATUS,
            ChannelMessage::NoStatus => Self::TAG_NO_STATUS,
            ChannelMessage::BodyPermitted(_) => Self::TAG_BODY_PERMITTED,
            ChannelMessage::Headers(_) => Self::TAG_HEADERS,
            ChannelMessage::BodyChunk(_) => Self::TAG_BODY_CHUNK,
            ChannelMessage::Done => Self::TAG_DONE,
        }
    }

    /// Short name used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::Status(_) => "status",
            ChannelMessage::NoStatus => "no-status",
            ChannelMessage::BodyPermitted(_) => "body-permitted",
            ChannelMessage::Headers(_) => "headers",
            ChannelMessage::BodyChunk(_) => "body-chunk",
            ChannelMessage::Done => "done",
        }
    }
}
