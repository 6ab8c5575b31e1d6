//! Lazy response body backed by a worker channel.
//!
//! Each pull reads at most one frame, so only one chunk is ever held in
//! memory. The body owns the worker once the headers have been handed out:
//! it reaps the worker after `Done`, after a protocol violation, and (via
//! [`WorkerHandle`]'s drop) when the caller walks away early.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::io::DuplexStream;

use crate::channel::{ChannelMessage, FrameReader, ProtocolViolation};
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::worker::WorkerHandle;

const CHUNKED_TERMINATOR: &[u8] = b"0\r\n\r\n";

/// How body chunks are framed on their way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Chunks are passed through as-is.
    Identity,
    /// Chunks are re-emitted as HTTP/1.1 chunks, ending with a zero-size chunk.
    Chunked,
}

impl Framing {
    fn frame(self, chunk: Bytes) -> Bytes {
        match self {
            Framing::Identity => chunk,
            Framing::Chunked => {
                let size = format!("{:x}\r\n", chunk.len());
                let mut framed = BytesMut::with_capacity(size.len() + chunk.len() + 2);
                framed.extend_from_slice(size.as_bytes());
                framed.extend_from_slice(&chunk);
                framed.extend_from_slice(b"\r\n");
                framed.freeze()
            }
        }
    }
}

/// Supervisor end of a worker channel plus the worker it belongs to.
#[derive(Debug)]
pub(crate) struct ChannelEnd {
    frames: Option<FrameReader<DuplexStream>>,
    worker: WorkerHandle,
}

impl ChannelEnd {
    pub(crate) fn new(frames: FrameReader<DuplexStream>, worker: WorkerHandle) -> Self {
        Self {
            frames: Some(frames),
            worker,
        }
    }

    /// Next message; EOF is reported as a violation naming `expected`.
    pub(crate) async fn expect(&mut self, expected: &'static str) -> Result<ChannelMessage, ProtocolViolation> {
        match self.read().await? {
            Some(msg) => Ok(msg),
            None => Err(ProtocolViolation::UnexpectedEof { expected }),
        }
    }

    pub(crate) async fn read(&mut self) -> Result<Option<ChannelMessage>, ProtocolViolation> {
        match self.frames.as_mut() {
            Some(frames) => frames.read().await,
            None => Ok(None),
        }
    }

    /// Close our end of the pipe, then wait for a worker that has nothing
    /// left to write (after `Done`, or when no body is permitted).
    pub(crate) async fn finish(&mut self) {
        self.frames = None;
        self.worker.wait().await;
    }

    /// Close our end of the pipe, abort the worker and wait for it.
    ///
    /// A worker parked on a stalled upstream body never writes again, so it
    /// would never see the broken pipe; it has to be aborted.
    pub(crate) async fn kill(&mut self) {
        self.frames = None;
        self.worker.kill().await;
    }

    pub(crate) fn worker(&self) -> &WorkerHandle {
        &self.worker
    }
}

#[derive(Debug)]
enum BodyState {
    Streaming(ChannelEnd),
    Terminator,
    Finished,
}

/// Single-pass sequence of body chunks for one proxied response.
///
/// Dropping an unfinished body aborts its worker, but the exit is awaited by
/// a detached reaper task, so it is only observed some time after the drop.
/// Call [`ResponseBody::close`] when the worker must be gone on return.
#[derive(Debug)]
pub struct ResponseBody {
    state: BodyState,
    framing: Framing,
}

impl ResponseBody {
    /// A body with no chunks at all (no body permitted).
    pub fn empty() -> Self {
        Self {
            state: BodyState::Finished,
            framing: Framing::Identity,
        }
    }

    pub(crate) fn streaming(channel: ChannelEnd, framing: Framing) -> Self {
        Self {
            state: BodyState::Streaming(channel),
            framing,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Change how chunks are framed. Only meaningful before the first pull.
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    /// True once the sequence is exhausted and its worker reaped.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, BodyState::Finished)
    }

    /// Pull the next chunk, reading the channel as needed.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ProxyError>> {
        loop {
            if matches!(self.state, BodyState::Terminator) {
                self.state = BodyState::Finished;
                return Some(Ok(Bytes::from_static(CHUNKED_TERMINATOR)));
            }
            let BodyState::Streaming(channel) = &mut self.state else {
                return None;
            };

            let violation = match channel.read().await {
                Ok(Some(ChannelMessage::BodyChunk(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    metrics::record_body_bytes(chunk.len());
                    return Some(Ok(self.framing.frame(chunk)));
                }
                Ok(Some(ChannelMessage::Done)) => {
                    channel.finish().await;
                    self.state = match self.framing {
                        Framing::Chunked => BodyState::Terminator,
                        Framing::Identity => BodyState::Finished,
                    };
                    continue;
                }
                Ok(Some(other)) => ProtocolViolation::UnexpectedMessage {
                    expected: "body-chunk or done",
                    found: other.kind(),
                },
                Ok(None) => ProtocolViolation::UnexpectedEof {
                    expected: "body-chunk or done",
                },
                Err(e) => e,
            };

            tracing::error!(
                worker_id = %channel.worker().id(),
                error = %violation,
                "Proxy body stream broken"
            );
            channel.kill().await;
            self.state = BodyState::Finished;
            return Some(Err(violation.into()));
        }
    }

    /// Stop reading, abort the worker and reap it before returning.
    pub async fn close(mut self) {
        if let BodyState::Streaming(channel) = &mut self.state {
            channel.kill().await;
        }
        self.state = BodyState::Finished;
    }

    /// Turn the body into a `Stream` for hosts that consume streams.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, ProxyError>> + Send + 'static {
        futures_util::stream::unfold(self, |mut body| async move {
            let item = body.next_chunk().await?;
            Some((item, body))
        })
    }
}
