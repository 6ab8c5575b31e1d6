//! Error types surfaced by the proxy engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http_body_util::LengthLimitError;
use thiserror::Error;

use crate::channel::ProtocolViolation;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Final outcome of a failed proxy attempt.
///
/// Whatever the variant, the worker behind the attempt has already been
/// reaped by the time the error is returned.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The worker never obtained a status line (DNS, connect, timeout).
    #[error("no response from upstream {destination}")]
    Connection { destination: String },

    /// Upstream answered 5xx while `raise_on_5xx` is enabled.
    #[error("upstream returned server error {0}")]
    HttpServer(u16),

    #[error("proxy channel protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("invalid proxy destination {destination:?}: {reason}")]
    InvalidDestination {
        destination: String,
        reason: String,
    },

    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),
}

impl ProxyError {
    /// Only upstream 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::HttpServer(_))
    }

    /// Status presented to the original caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Connection { .. } | ProxyError::HttpServer(_) | ProxyError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::InvalidDestination { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::RequestBody(e) => {
                if is_length_limit(e) {
                    StatusCode::PAYLOAD_TOO_LARGE
                } else {
                    StatusCode::BAD_REQUEST
                }
            }
        }
    }
}

fn is_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}
