//! Dispatch middleware.
//!
//! # States
//! ```text
//! Evaluating ── Skip ─────────────▶ PassThrough (next.run) ─▶ Done
//!     │
//!     └── Forward(uri) ─▶ Proxying(attempt 1)
//!                             │  HttpServerError and retries left
//!                             ├──────────────▶ Proxying(attempt n+1)
//!                             ├── success ───▶ Done (ProxyResponse)
//!                             └── any other error / retries exhausted ─▶ Done (error)
//! ```
//!
//! # Design Decisions
//! - One fresh worker and channel per attempt; a failed attempt's worker is
//!   reaped before the next one is spawned
//! - Connection errors are never retried
//! - Retries can only happen before the first body byte is returned

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::{FrameReader, FrameWriter};
use crate::config::{ProxyConfig, StreamingConfig};
use crate::error::ProxyError;
use crate::http::request::{parse_destination, InboundBody, OutboundRequestSpec};
use crate::http::response::ProxyResponse;
use crate::observability::metrics;
use crate::proxy::predicate::{ProxyDirective, ProxyPredicate};
use crate::proxy::reader::ResponseReader;
use crate::resilience::RetryPolicy;
use crate::worker::{WorkerExecutor, WorkerTracker};

struct Inner {
    predicate: Box<dyn ProxyPredicate>,
    executor: WorkerExecutor,
    settings: StreamingConfig,
    retry: RetryPolicy,
    write_timeout: Duration,
    tracker: WorkerTracker,
}

/// Selective streaming proxy, installed as axum middleware state.
///
/// Cheap to clone; clones share the predicate, HTTP client and worker
/// tracker.
#[derive(Clone)]
pub struct StreamingProxy {
    inner: Arc<Inner>,
}

impl StreamingProxy {
    pub fn new<P>(config: &ProxyConfig, predicate: P) -> Self
    where
        P: ProxyPredicate + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                predicate: Box::new(predicate),
                executor: WorkerExecutor::new(&config.timeouts),
                settings: config.streaming.clone(),
                retry: RetryPolicy::from_config(&config.streaming),
                write_timeout: Duration::from_secs(config.timeouts.channel_write_secs),
                tracker: WorkerTracker::new(),
            }),
        }
    }

    /// Spawned/live/reaped worker counters.
    pub fn tracker(&self) -> &WorkerTracker {
        &self.inner.tracker
    }

    /// Handle one request: pass it through or proxy it.
    pub async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let destination = match self.inner.predicate.evaluate(&request) {
            ProxyDirective::Skip => {
                metrics::record_decision("pass");
                return next.run(request).await;
            }
            ProxyDirective::Forward(destination) => destination,
        };

        metrics::record_decision("proxy");
        tracing::info!(
            destination = %destination,
            method = %request.method(),
            path = %request.uri().path(),
            "Starting proxy request"
        );

        match self.forward(&destination, request).await {
            Ok(response) => {
                tracing::info!(
                    destination = %destination,
                    status = %response.status,
                    "Finishing proxy request"
                );
                response.into_response()
            }
            Err(e) => {
                tracing::error!(destination = %destination, error = %e, "Proxy request failed");
                e.into_response()
            }
        }
    }

    /// Proxy `request` to `destination`, retrying upstream 5xx as configured.
    ///
    /// Returns once the status and headers are known; the body streams from
    /// the returned [`ProxyResponse`].
    pub async fn forward(
        &self,
        destination: &str,
        request: Request<Body>,
    ) -> Result<ProxyResponse, ProxyError> {
        let uri = parse_destination(destination)?;
        let settings = &self.inner.settings;
        let retry = self.inner.retry;

        let (parts, body) = request.into_parts();
        let replay = settings.raise_on_5xx && retry.max_retries > 0;
        let mut body = InboundBody::prepare(body, replay, settings.max_replay_body_bytes).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let spec = OutboundRequestSpec::from_inbound(&parts, uri.clone(), body.for_attempt());
            let reader = self.spawn_attempt(spec);
            let worker_id = reader.worker_id();

            match reader.receive(settings.raise_on_5xx).await {
                Ok(response) => {
                    metrics::record_attempt("ok");
                    metrics::record_time_to_headers(started);
                    return Ok(response);
                }
                Err(e) => {
                    metrics::record_attempt(outcome_label(&e));

                    if !retry.should_retry(attempt, &e) {
                        return Err(e);
                    }

                    let delay = retry.backoff(attempt);
                    tracing::warn!(
                        destination = %destination,
                        worker_id = %worker_id,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "Retrying proxy request"
                    );
                    metrics::record_retry();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    /// Start one attempt: a fresh channel and a worker writing into it.
    pub fn spawn_attempt(&self, spec: OutboundRequestSpec) -> ResponseReader {
        let settings = &self.inner.settings;
        let (worker_end, supervisor_end) = tokio::io::duplex(settings.channel_capacity_bytes);

        let destination = spec.destination.to_string();
        let writer = FrameWriter::new(worker_end, self.inner.write_timeout)
            .with_max_frame(settings.max_frame_bytes);
        let executor = self.inner.executor.clone();

        let worker = self
            .inner
            .tracker
            .spawn(move |id| executor.run(id, spec, writer));

        let frames = FrameReader::new(supervisor_end).with_max_frame(settings.max_frame_bytes);
        ResponseReader::new(frames, worker, destination)
    }
}

fn outcome_label(error: &ProxyError) -> &'static str {
    match error {
        ProxyError::Connection { .. } => "connection_error",
        ProxyError::HttpServer(_) => "server_error",
        ProxyError::Protocol(_) => "protocol_error",
        ProxyError::InvalidDestination { .. } | ProxyError::RequestBody(_) => "request_error",
    }
}

/// axum middleware entry point.
///
/// ```ignore
/// let proxy = StreamingProxy::new(&config, predicate);
/// let app = app.layer(axum::middleware::from_fn_with_state(proxy, streaming_proxy_middleware));
/// ```
pub async fn streaming_proxy_middleware(
    State(proxy): State<StreamingProxy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    proxy.handle(request, next).await
}
