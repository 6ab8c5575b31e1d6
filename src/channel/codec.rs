//! Length-prefixed frame codec.
//!
//! Every frame is a one byte tag, a big-endian `u32` payload length and the
//! payload itself:
//!
//! ```text
//! +--------+------------------+----------------------+
//! | tag u8 | length u32 (BE)  | payload (length B)   |
//! +--------+------------------+----------------------+
//! ```
//!
//! `Headers` payloads are a `u32` entry count followed by `u32`-prefixed
//! name and value byte strings. Body chunks are carried verbatim, so any
//! byte sequence (including an empty one) survives the trip.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::error::{ProtocolViolation, SendError};
use crate::channel::message::ChannelMessage;

/// Tag byte plus length prefix.
pub const HEADER_SIZE: usize = 5;

/// Largest payload accepted by default (16 MiB).
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Floor for the `Headers` payload limit. Upstream heads are bounded by the
/// HTTP client's own read buffer (about 400 KiB for hyper), not by the
/// body-chunk size, so the configured frame limit never applies below this.
pub const MAX_HEADERS_FRAME: usize = 512 * 1024;

const READ_RESERVE: usize = 8 * 1024;

/// Append the wire form of `msg` to `buf`.
pub fn encode(msg: &ChannelMessage, buf: &mut BytesMut) {
    match msg {
        ChannelMessage::Status(code) => put_frame(buf, msg.tag(), &code.to_be_bytes()),
        ChannelMessage::NoStatus | ChannelMessage::Done => put_frame(buf, msg.tag(), &[]),
        ChannelMessage::BodyPermitted(permitted) => {
            put_frame(buf, msg.tag(), &[u8::from(*permitted)])
        }
        ChannelMessage::BodyChunk(chunk) => put_frame(buf, msg.tag(), chunk),
        ChannelMessage::Headers(headers) => {
            let start = buf.len();
            buf.put_u8(msg.tag());
            buf.put_u32(0);
            buf.put_u32(headers.len() as u32);
            for (name, value) in headers.iter() {
                buf.put_u32(name.as_str().len() as u32);
                buf.put_slice(name.as_str().as_bytes());
                buf.put_u32(value.as_bytes().len() as u32);
                buf.put_slice(value.as_bytes());
            }
            // Patch the length prefix now that the payload size is known.
            let len = (buf.len() - start - HEADER_SIZE) as u32;
            buf[start + 1..start + HEADER_SIZE].copy_from_slice(&len.to_be_bytes());
        }
    }
}

fn put_frame(buf: &mut BytesMut, tag: u8, payload: &[u8]) {
    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u8(tag);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Decode one frame from the front of `buf`.
///
/// `max_frame` bounds body chunks; `Headers` frames may grow up to
/// [`MAX_HEADERS_FRAME`] whatever `max_frame` is. Returns `Ok(None)` when
/// `buf` does not yet hold a whole frame; nothing is consumed in that case.
pub fn decode(
    buf: &mut BytesMut,
    max_frame: usize,
) -> Result<Option<ChannelMessage>, ProtocolViolation> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let tag = buf[0];
    if !(ChannelMessage::TAG_STATUS..=ChannelMessage::TAG_DONE).contains(&tag) {
        return Err(ProtocolViolation::UnknownTag(tag));
    }

    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    let max = if tag == ChannelMessage::TAG_HEADERS {
        max_frame.max(MAX_HEADERS_FRAME)
    } else {
        max_frame
    };
    if len > max {
        return Err(ProtocolViolation::FrameTooLarge { len, max });
    }

    if buf.len() < HEADER_SIZE + len {
        buf.reserve(HEADER_SIZE + len - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    let payload = buf.split_to(len).freeze();
    decode_payload(tag, payload).map(Some)
}

fn decode_payload(tag: u8, mut payload: Bytes) -> Result<ChannelMessage, ProtocolViolation> {
    let msg = match tag {
        ChannelMessage::TAG_STATUS => {
            expect_len(&payload, 2, "status")?;
            ChannelMessage::Status(payload.get_u16())
        }
        ChannelMessage::TAG_NO_STATUS => {
            expect_len(&payload, 0, "no-status")?;
            ChannelMessage::NoStatus
        }
        ChannelMessage::TAG_BODY_PERMITTED => {
            expect_len(&payload, 1, "body-permitted")?;
            match payload.get_u8() {
                0 => ChannelMessage::BodyPermitted(false),
                1 => ChannelMessage::BodyPermitted(true),
                _ => {
                    return Err(ProtocolViolation::Malformed {
                        kind: "body-permitted",
                        reason: "flag is neither 0 nor 1",
                    })
                }
            }
        }
        ChannelMessage::TAG_HEADERS => ChannelMessage::Headers(decode_headers(payload)?),
        ChannelMessage::TAG_BODY_CHUNK => ChannelMessage::BodyChunk(payload),
        ChannelMessage::TAG_DONE => {
            expect_len(&payload, 0, "done")?;
            ChannelMessage::Done
        }
        other => return Err(ProtocolViolation::UnknownTag(other)),
    };
    Ok(msg)
}

fn expect_len(payload: &Bytes, len: usize, kind: &'static str) -> Result<(), ProtocolViolation> {
    if payload.len() == len {
        Ok(())
    } else {
        Err(ProtocolViolation::Malformed {
            kind,
            reason: "unexpected payload size",
        })
    }
}

fn decode_headers(mut payload: Bytes) -> Result<HeaderMap, ProtocolViolation> {
    let count = take_u32(&mut payload)? as usize;
    let mut headers = HeaderMap::with_capacity(count.min(128));

    for _ in 0..count {
        let name = take_field(&mut payload)?;
        let value = take_field(&mut payload)?;
        let name = HeaderName::from_bytes(&name).map_err(|_| ProtocolViolation::Malformed {
            kind: "headers",
            reason: "invalid header name",
        })?;
        let value = HeaderValue::from_maybe_shared(value).map_err(|_| {
            ProtocolViolation::Malformed {
                kind: "headers",
                reason: "invalid header value",
            }
        })?;
        headers.append(name, value);
    }

    if payload.has_remaining() {
        return Err(ProtocolViolation::Malformed {
            kind: "headers",
            reason: "trailing bytes after last entry",
        });
    }
    Ok(headers)
}

fn take_u32(payload: &mut Bytes) -> Result<u32, ProtocolViolation> {
    if payload.remaining() < 4 {
        return Err(ProtocolViolation::Malformed {
            kind: "headers",
            reason: "truncated length",
        });
    }
    Ok(payload.get_u32())
}

fn take_field(payload: &mut Bytes) -> Result<Bytes, ProtocolViolation> {
    let len = take_u32(payload)? as usize;
    if payload.remaining() < len {
        return Err(ProtocolViolation::Malformed {
            kind: "headers",
            reason: "entry longer than frame",
        });
    }
    Ok(payload.split_to(len))
}

/// Writes whole frames onto the worker end of a channel.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    buf: BytesMut,
    write_timeout: Duration,
    max_frame: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Create a writer whose every frame must land within `write_timeout`.
    pub fn new(inner: W, write_timeout: Duration) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_RESERVE),
            write_timeout,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Override the largest payload the peer accepts.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn max_frame(&self) -> usize {
        self.max_frame
    }

    /// Encode and write one message.
    ///
    /// Fails with [`SendError::Closed`] once the reader is gone and with
    /// [`SendError::TimedOut`] if the reader stops draining the pipe.
    pub async fn send(&mut self, msg: &ChannelMessage) -> Result<(), SendError> {
        self.buf.clear();
        encode(msg, &mut self.buf);

        match tokio::time::timeout(self.write_timeout, self.inner.write_all(&self.buf)).await {
            Ok(result) => result.map_err(SendError::Closed),
            Err(_) => Err(SendError::TimedOut(self.write_timeout)),
        }
    }

    /// Flush and close the write half so the reader observes EOF.
    pub async fn finish(mut self) -> Result<(), SendError> {
        match tokio::time::timeout(self.write_timeout, self.inner.shutdown()).await {
            Ok(result) => result.map_err(SendError::Closed),
            Err(_) => Err(SendError::TimedOut(self.write_timeout)),
        }
    }
}

/// Reads whole frames from the supervisor end of a channel.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_RESERVE),
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Read the next message.
    ///
    /// `Ok(None)` means the writer closed the channel on a frame boundary.
    pub async fn read(&mut self) -> Result<Option<ChannelMessage>, ProtocolViolation> {
        loop {
            if let Some(msg) = decode(&mut self.buf, self.max_frame)? {
                return Ok(Some(msg));
            }

            self.buf.reserve(READ_RESERVE);
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return if self.buf.is_empty() {
                    Ok(None)
                } else {
                    Err(ProtocolViolation::TruncatedFrame)
                };
            }
        }
    }
}
