//! Supervisor side of a proxy attempt.
//!
//! # Responsibilities
//! - Read status, body permission and headers off the worker channel
//! - Apply the `raise_on_5xx` policy
//! - Hand the remaining channel to a lazy [`ResponseBody`]
//! - Reap the worker on every path that does not hand it on
//!
//! # States
//! ```text
//! AwaitStatus ── NoStatus / EOF ──────────────▶ reap → ConnectionError
//!     │
//!     ├── Status 5xx (raise_on_5xx) ───────────▶ reap → HttpServerError
//!     ▼
//! AwaitBodyPermitted → AwaitHeaders
//!     │
//!     ├── body not permitted ──────────────────▶ reap → empty body
//!     └── body permitted ──────────────────────▶ ResponseBody owns the worker
//!
//! any malformed or out-of-order frame ─────────▶ reap → ProtocolViolation
//! ```

use axum::http::{HeaderMap, StatusCode};
use tokio::io::DuplexStream;

use crate::channel::{ChannelMessage, FrameReader, ProtocolViolation};
use crate::error::ProxyError;
use crate::http::headers::is_chunked;
use crate::http::response::ProxyResponse;
use crate::proxy::body::{ChannelEnd, Framing, ResponseBody};
use crate::worker::{WorkerHandle, WorkerId};

/// Status line and headers as read off the channel.
struct Head {
    status: StatusCode,
    body_permitted: bool,
    headers: HeaderMap,
}

/// Reads one attempt's response from its worker channel.
#[derive(Debug)]
pub struct ResponseReader {
    channel: ChannelEnd,
    destination: String,
}

impl ResponseReader {
    pub fn new(
        frames: FrameReader<DuplexStream>,
        worker: WorkerHandle,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            channel: ChannelEnd::new(frames, worker),
            destination: destination.into(),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.channel.worker().id()
    }

    /// Wait for the status line and headers.
    ///
    /// On error the worker has already been reaped. On success the worker
    /// is either reaped (no body) or owned by the returned body.
    pub async fn receive(mut self, raise_on_5xx: bool) -> Result<ProxyResponse, ProxyError> {
        let head = match self.read_head(raise_on_5xx).await {
            Ok(head) => head,
            Err(e) => {
                // The worker may be mid-body on a 5xx; do not wait for it to
                // notice the closed pipe.
                self.channel.kill().await;
                return Err(e);
            }
        };

        tracing::debug!(
            worker_id = %self.worker_id(),
            status = %head.status,
            body_permitted = head.body_permitted,
            "Supervisor received response head"
        );

        let body = if head.body_permitted {
            let framing = if is_chunked(&head.headers) {
                Framing::Chunked
            } else {
                Framing::Identity
            };
            ResponseBody::streaming(self.channel, framing)
        } else {
            // Nothing else is coming; reap now.
            self.channel.finish().await;
            ResponseBody::empty()
        };

        Ok(ProxyResponse {
            status: head.status,
            headers: head.headers,
            body,
        })
    }

    async fn read_head(&mut self, raise_on_5xx: bool) -> Result<Head, ProxyError> {
        let code = match self.channel.read().await? {
            Some(ChannelMessage::Status(code)) => code,
            Some(ChannelMessage::NoStatus) | None => {
                tracing::error!(
                    worker_id = %self.worker_id(),
                    destination = %self.destination,
                    "Supervisor received no status from worker"
                );
                return Err(ProxyError::Connection {
                    destination: self.destination.clone(),
                });
            }
            Some(other) => {
                return Err(ProtocolViolation::UnexpectedMessage {
                    expected: "status",
                    found: other.kind(),
                }
                .into())
            }
        };

        let status = StatusCode::from_u16(code).map_err(|_| ProtocolViolation::Malformed {
            kind: "status",
            reason: "not a valid HTTP status code",
        })?;

        if raise_on_5xx && status.is_server_error() {
            tracing::error!(
                worker_id = %self.worker_id(),
                destination = %self.destination,
                status = %status,
                "Supervisor received server error status"
            );
            return Err(ProxyError::HttpServer(code));
        }

        let body_permitted = match self.channel.expect("body-permitted").await? {
            ChannelMessage::BodyPermitted(permitted) => permitted,
            other => {
                return Err(ProtocolViolation::UnexpectedMessage {
                    expected: "body-permitted",
                    found: other.kind(),
                }
                .into())
            }
        };

        let headers = match self.channel.expect("headers").await? {
            ChannelMessage::Headers(headers) => headers,
            other => {
                return Err(ProtocolViolation::UnexpectedMessage {
                    expected: "headers",
                    found: other.kind(),
                }
                .into())
            }
        };

        Ok(Head {
            status,
            body_permitted,
            headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FrameWriter;
    use crate::worker::WorkerTracker;
    use axum::http::HeaderValue;
    use bytes::Bytes;
    use std::time::Duration;

    /// Spawn a fake worker that writes `script` and exits.
    fn scripted(tracker: &WorkerTracker, script: Vec<ChannelMessage>, capacity: usize) -> ResponseReader {
        let (worker_end, supervisor_end) = tokio::io::duplex(capacity);
        let worker = tracker.spawn(move |_| async move {
            let mut writer = FrameWriter::new(worker_end, Duration::from_secs(5));
            for msg in &script {
                if writer.send(msg).await.is_err() {
                    return;
                }
            }
        });
        ResponseReader::new(FrameReader::new(supervisor_end), worker, "http://upstream.test/")
    }

    fn head(status: u16, permitted: bool, headers: HeaderMap) -> Vec<ChannelMessage> {
        vec![
            ChannelMessage::Status(status),
            ChannelMessage::BodyPermitted(permitted),
            ChannelMessage::Headers(headers),
        ]
    }

    fn chunked_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers
    }

    async fn collect(mut body: ResponseBody) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next_chunk().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn no_status_is_connection_error() {
        let tracker = WorkerTracker::new();
        let reader = scripted(&tracker, vec![ChannelMessage::NoStatus], 1024);

        let err = reader.receive(false).await.unwrap_err();
        assert!(matches!(err, ProxyError::Connection { .. }));
        assert_eq!(tracker.reaped(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn silent_worker_exit_is_connection_error() {
        let tracker = WorkerTracker::new();
        let reader = scripted(&tracker, vec![], 1024);

        let err = reader.receive(false).await.unwrap_err();
        assert!(matches!(err, ProxyError::Connection { .. }));
        assert_eq!(tracker.reaped(), 1);
    }

    #[tokio::test]
    async fn server_error_raised_and_busy_worker_reaped() {
        let tracker = WorkerTracker::new();
        // Far more body than the pipe holds: the worker would block forever
        // if the reader waited without closing its end.
        let mut script = head(503, true, HeaderMap::new());
        script.extend((0..64).map(|_| ChannelMessage::BodyChunk(Bytes::from(vec![7u8; 1024]))));
        script.push(ChannelMessage::Done);
        let reader = scripted(&tracker, script, 256);

        let result = tokio::time::timeout(Duration::from_secs(2), reader.receive(true))
            .await
            .expect("reader must not wait on a blocked worker");
        assert!(matches!(result, Err(ProxyError::HttpServer(503))));
        assert_eq!(tracker.reaped(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn server_error_passes_through_without_policy() {
        let tracker = WorkerTracker::new();
        let mut script = head(502, true, HeaderMap::new());
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"bad gateway")));
        script.push(ChannelMessage::Done);
        let reader = scripted(&tracker, script, 1024);

        let response = reader.receive(false).await.unwrap();
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(collect(response.body).await, b"bad gateway");
    }

    #[tokio::test]
    async fn no_body_reaps_immediately() {
        let tracker = WorkerTracker::new();
        let reader = scripted(&tracker, head(204, false, HeaderMap::new()), 1024);

        let mut response = reader.receive(false).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(tracker.reaped(), 1);
        assert!(response.body.is_finished());
        assert!(response.body.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn identity_body_streams_binary_chunks() {
        let tracker = WorkerTracker::new();
        let mut script = head(200, true, HeaderMap::new());
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"\x00\n\r\n")));
        script.push(ChannelMessage::BodyChunk(Bytes::new()));
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"tail\xff")));
        script.push(ChannelMessage::Done);
        let reader = scripted(&tracker, script, 8);

        let response = reader.receive(false).await.unwrap();
        assert_eq!(tracker.reaped(), 0, "worker stays with the body");

        assert_eq!(collect(response.body).await, b"\x00\n\r\ntail\xff");
        assert_eq!(tracker.reaped(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn chunked_body_is_reframed() {
        let tracker = WorkerTracker::new();
        let mut script = head(200, true, chunked_headers());
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"hello")));
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b" streaming world")));
        script.push(ChannelMessage::Done);
        let reader = scripted(&tracker, script, 1024);

        let response = reader.receive(false).await.unwrap();
        assert_eq!(response.body.framing(), Framing::Chunked);

        let bytes = collect(response.body).await;
        assert_eq!(bytes, b"5\r\nhello\r\n10\r\n streaming world\r\n0\r\n\r\n");
        assert_eq!(tracker.reaped(), 1);
    }

    #[tokio::test]
    async fn chunked_body_without_chunks_still_terminates() {
        let tracker = WorkerTracker::new();
        let mut script = head(200, true, chunked_headers());
        script.push(ChannelMessage::Done);
        let reader = scripted(&tracker, script, 1024);

        let response = reader.receive(false).await.unwrap();
        assert_eq!(collect(response.body).await, b"0\r\n\r\n");
    }

    #[tokio::test]
    async fn out_of_order_head_is_protocol_violation() {
        let tracker = WorkerTracker::new();
        let script = vec![
            ChannelMessage::Status(200),
            ChannelMessage::Headers(HeaderMap::new()),
        ];
        let reader = scripted(&tracker, script, 1024);

        let err = reader.receive(false).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Protocol(ProtocolViolation::UnexpectedMessage {
                expected: "body-permitted",
                found: "headers"
            })
        ));
        assert_eq!(tracker.reaped(), 1);
    }

    #[tokio::test]
    async fn truncated_body_reports_error_and_reaps() {
        let tracker = WorkerTracker::new();
        let mut script = head(200, true, HeaderMap::new());
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"partial")));
        let reader = scripted(&tracker, script, 1024);

        let mut body = reader.receive(false).await.unwrap().body;
        assert_eq!(&body.next_chunk().await.unwrap().unwrap()[..], b"partial");
        assert!(matches!(
            body.next_chunk().await,
            Some(Err(ProxyError::Protocol(ProtocolViolation::UnexpectedEof { .. })))
        ));
        assert!(body.next_chunk().await.is_none());
        assert_eq!(tracker.reaped(), 1);
    }

    #[tokio::test]
    async fn abandoned_body_still_reaps_worker() {
        let tracker = WorkerTracker::new();
        let (worker_end, supervisor_end) = tokio::io::duplex(1024);
        let worker = tracker.spawn(move |_| async move {
            let mut writer = FrameWriter::new(worker_end, Duration::from_secs(30));
            for msg in head(200, true, HeaderMap::new()) {
                writer.send(&msg).await.unwrap();
            }
            writer
                .send(&ChannelMessage::BodyChunk(Bytes::from_static(b"first")))
                .await
                .unwrap();
            // Upstream stalls; the worker would sit here indefinitely.
            std::future::pending::<()>().await;
        });
        let reader = ResponseReader::new(FrameReader::new(supervisor_end), worker, "http://slow.test/");

        let mut body = reader.receive(false).await.unwrap().body;
        assert_eq!(&body.next_chunk().await.unwrap().unwrap()[..], b"first");
        drop(body);

        assert!(tracker.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(tracker.spawned(), 1);
        assert_eq!(tracker.reaped(), 1);
    }

    /// Fake worker that writes `script` and then hangs, like a worker
    /// reading an upstream body that stopped sending.
    fn stalled(tracker: &WorkerTracker, script: Vec<ChannelMessage>) -> ResponseReader {
        let (worker_end, supervisor_end) = tokio::io::duplex(1024);
        let worker = tracker.spawn(move |_| async move {
            let mut writer = FrameWriter::new(worker_end, Duration::from_secs(30));
            for msg in &script {
                if writer.send(msg).await.is_err() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        });
        ResponseReader::new(FrameReader::new(supervisor_end), worker, "http://stalled.test/")
    }

    #[tokio::test]
    async fn server_error_reaps_worker_stalled_on_upstream() {
        let tracker = WorkerTracker::new();
        let mut script = head(503, true, HeaderMap::new());
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"abcde")));
        let reader = stalled(&tracker, script);

        let result = tokio::time::timeout(Duration::from_secs(2), reader.receive(true))
            .await
            .expect("reader must not wait on a stalled worker");
        assert!(matches!(result, Err(ProxyError::HttpServer(503))));
        assert_eq!(tracker.reaped(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn close_reaps_worker_stalled_on_upstream() {
        let tracker = WorkerTracker::new();
        let mut script = head(200, true, HeaderMap::new());
        script.push(ChannelMessage::BodyChunk(Bytes::from_static(b"abcde")));
        let reader = stalled(&tracker, script);

        let mut body = reader.receive(false).await.unwrap().body;
        assert_eq!(&body.next_chunk().await.unwrap().unwrap()[..], b"abcde");

        tokio::time::timeout(Duration::from_secs(2), body.close())
            .await
            .expect("close must not wait on a stalled worker");
        assert_eq!(tracker.reaped(), 1);
        assert_eq!(tracker.live(), 0);
    }

    #[tokio::test]
    async fn close_reaps_deterministically() {
        let tracker = WorkerTracker::new();
        let mut script = head(200, true, HeaderMap::new());
        script.extend((0..32).map(|_| ChannelMessage::BodyChunk(Bytes::from(vec![1u8; 512]))));
        script.push(ChannelMessage::Done);
        let reader = scripted(&tracker, script, 128);

        let mut body = reader.receive(false).await.unwrap().body;
        assert!(body.next_chunk().await.is_some());
        body.close().await;

        assert_eq!(tracker.reaped(), 1);
        assert_eq!(tracker.live(), 0);
    }
}
