//! Upstream call execution.
//!
//! # Responsibilities
//! - Perform one upstream HTTP call per attempt
//! - Transcode status, body permission, headers and body onto the channel
//! - Stream the body chunk by chunk as it arrives
//!
//! # Design Decisions
//! - Any failure before a status line becomes `NoStatus` on the channel
//! - Zero-length upstream reads are never forwarded
//! - The worker ends on the first failed channel write (reader gone or
//!   stalled past the write deadline)

use axum::body::Body;
use axum::http::{Method, StatusCode};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::channel::{ChannelMessage, FrameWriter, SendError};
use crate::config::TimeoutConfig;
use crate::http::request::OutboundRequestSpec;
use crate::worker::tracker::WorkerId;

/// Why a worker stopped before writing `Done`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Channel(#[from] SendError),

    #[error("upstream body failed mid-stream: {0}")]
    UpstreamBody(#[source] axum::Error),
}

/// How a worker's attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// No status line was obtained; `NoStatus` was written.
    Unreachable,
    /// The full response was written, `Done` included when a body was permitted.
    Completed { status: StatusCode, body_bytes: u64 },
}

/// Whether a response to `method` with `status` may carry a body.
pub fn body_permitted(method: &Method, status: StatusCode) -> bool {
    !(method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Performs upstream calls and writes the results onto worker channels.
#[derive(Clone)]
pub struct WorkerExecutor {
    client: Client<HttpConnector, Body>,
    response_timeout: Duration,
}

impl WorkerExecutor {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            response_timeout: Duration::from_secs(timeouts.response_secs),
        }
    }

    /// Worker task body: execute `spec`, log the outcome, close the channel.
    pub async fn run<W>(self, id: WorkerId, spec: OutboundRequestSpec, mut channel: FrameWriter<W>)
    where
        W: AsyncWrite + Unpin,
    {
        let destination = spec.destination.to_string();

        match self.execute(spec, &mut channel).await {
            Ok(WorkerOutcome::Unreachable) => {
                tracing::debug!(worker_id = %id, destination = %destination, "Worker wrote no-status sentinel");
            }
            Ok(WorkerOutcome::Completed { status, body_bytes }) => {
                tracing::debug!(
                    worker_id = %id,
                    destination = %destination,
                    status = %status,
                    body_bytes,
                    "Worker finished upstream response"
                );
            }
            Err(WorkerError::Channel(e)) => {
                // Expected when the caller disconnects or a retry supersedes us.
                tracing::debug!(worker_id = %id, destination = %destination, error = %e, "Worker stopped writing");
            }
            Err(e) => {
                tracing::warn!(worker_id = %id, destination = %destination, error = %e, "Worker failed");
            }
        }

        let _ = channel.finish().await;
    }

    /// Perform the upstream call and write it onto `channel`.
    pub async fn execute<W>(
        &self,
        spec: OutboundRequestSpec,
        channel: &mut FrameWriter<W>,
    ) -> Result<WorkerOutcome, WorkerError>
    where
        W: AsyncWrite + Unpin,
    {
        let method = spec.method.clone();
        let destination = spec.destination.clone();

        let response =
            match tokio::time::timeout(self.response_timeout, self.client.request(spec.into_request())).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(destination = %destination, error = %e, "Upstream request failed");
                    channel.send(&ChannelMessage::NoStatus).await?;
                    return Ok(WorkerOutcome::Unreachable);
                }
                Err(_) => {
                    tracing::warn!(
                        destination = %destination,
                        timeout = ?self.response_timeout,
                        "Upstream did not answer in time"
                    );
                    channel.send(&ChannelMessage::NoStatus).await?;
                    return Ok(WorkerOutcome::Unreachable);
                }
            };

        let status = response.status();
        let permitted = body_permitted(&method, status);
        let (parts, body) = response.into_parts();

        channel.send(&ChannelMessage::Status(status.as_u16())).await?;
        channel.send(&ChannelMessage::BodyPermitted(permitted)).await?;
        channel.send(&ChannelMessage::Headers(parts.headers)).await?;

        if !permitted {
            return Ok(WorkerOutcome::Completed { status, body_bytes: 0 });
        }

        let max_frame = channel.max_frame();
        let mut body_bytes = 0u64;
        let mut stream = Body::new(body).into_data_stream();
        while let Some(chunk) = stream.next().await {
            let mut chunk = chunk.map_err(WorkerError::UpstreamBody)?;
            body_bytes += chunk.len() as u64;

            while !chunk.is_empty() {
                let piece = chunk.split_to(chunk.len().min(max_frame));
                channel.send(&ChannelMessage::BodyChunk(piece)).await?;
            }
        }

        channel.send(&ChannelMessage::Done).await?;
        Ok(WorkerOutcome::Completed { status, body_bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_permitted() {
        assert!(body_permitted(&Method::GET, StatusCode::OK));
        assert!(body_permitted(&Method::POST, StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!body_permitted(&Method::HEAD, StatusCode::OK));
        assert!(!body_permitted(&Method::GET, StatusCode::NO_CONTENT));
        assert!(!body_permitted(&Method::GET, StatusCode::NOT_MODIFIED));
        assert!(!body_permitted(&Method::GET, StatusCode::CONTINUE));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_writes_sentinel() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let executor = WorkerExecutor::new(&TimeoutConfig::default());
        let (worker_end, supervisor_end) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(worker_end, Duration::from_secs(1));
        let mut reader = crate::channel::FrameReader::new(supervisor_end);

        let spec = OutboundRequestSpec::new(
            Method::GET,
            format!("http://{}/", addr).parse().unwrap(),
            Default::default(),
            Body::empty(),
        );
        let outcome = executor.execute(spec, &mut writer).await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Unreachable);

        drop(writer);
        assert_eq!(reader.read().await.unwrap(), Some(ChannelMessage::NoStatus));
        assert_eq!(reader.read().await.unwrap(), None);
    }
}
