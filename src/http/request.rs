//! Outbound request construction.
//!
//! # Responsibilities
//! - Validate the destination chosen by the predicate
//! - Derive the upstream header set from the inbound request
//! - Hold the inbound body so each attempt gets its own copy
//!
//! # Design Decisions
//! - Without retries the body is streamed straight through, never buffered
//! - With retries it is buffered once (bounded) and replayed per attempt

use axum::body::Body;
use axum::http::{request::Parts, HeaderMap, Method, Request, Uri};
use bytes::Bytes;

use crate::error::ProxyError;
use crate::http::headers::forwarded_request_headers;

/// Everything a worker needs to perform one upstream call.
#[derive(Debug)]
pub struct OutboundRequestSpec {
    pub method: Method,
    pub destination: Uri,
    pub headers: HeaderMap,
    pub body: Body,
}

impl OutboundRequestSpec {
    pub fn new(method: Method, destination: Uri, headers: HeaderMap, body: Body) -> Self {
        Self {
            method,
            destination,
            headers,
            body,
        }
    }

    /// Outbound request for one attempt of forwarding the inbound request `parts`.
    pub fn from_inbound(parts: &Parts, destination: Uri, body: Body) -> Self {
        Self::new(
            parts.method.clone(),
            destination,
            forwarded_request_headers(&parts.headers),
            body,
        )
    }

    pub fn into_request(self) -> Request<Body> {
        let mut request = Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.destination;
        *request.headers_mut() = self.headers;
        request
    }
}

/// Parse and check a destination produced by a predicate.
pub fn parse_destination(destination: &str) -> Result<Uri, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidDestination {
        destination: destination.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = destination.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(&e.to_string()))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(_) => return Err(invalid("unsupported scheme")),
        None => return Err(invalid("destination must be an absolute URI")),
    }
    if uri.authority().is_none() {
        return Err(invalid("destination has no authority"));
    }
    Ok(uri)
}

/// The inbound request body, prepared for one or more attempts.
#[derive(Debug)]
pub enum InboundBody {
    /// Passed through once, unbuffered.
    Streaming(Option<Body>),
    /// Buffered for replay across retries.
    Buffered(Bytes),
}

impl InboundBody {
    /// Buffer `body` when it may need replaying, up to `limit` bytes.
    pub async fn prepare(body: Body, replay: bool, limit: usize) -> Result<Self, ProxyError> {
        if !replay {
            return Ok(InboundBody::Streaming(Some(body)));
        }
        let bytes = axum::body::to_bytes(body, limit)
            .await
            .map_err(ProxyError::RequestBody)?;
        Ok(InboundBody::Buffered(bytes))
    }

    /// Body for the next attempt. A streamed body can only be handed out once;
    /// later calls get an empty body.
    pub fn for_attempt(&mut self) -> Body {
        match self {
            InboundBody::Streaming(body) => body.take().unwrap_or_else(Body::empty),
            InboundBody::Buffered(bytes) => Body::from(bytes.clone()),
        }
    }
}
