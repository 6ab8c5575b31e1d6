//! Proxied response handed back to the host pipeline.
//!
//! # Responsibilities
//! - Carry upstream status, headers and the lazy body
//! - Convert into an axum `Response` without buffering the body
//!
//! # Design Decisions
//! - Hop-by-hop headers are stripped on conversion
//! - hyper applies its own transfer coding, so the body is handed over in
//!   identity framing and `Transfer-Encoding` is dropped; re-framed chunks
//!   are only produced for hosts that write body bytes verbatim

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::http::headers::strip_hop_by_hop;
use crate::proxy::body::{Framing, ResponseBody};

/// `{status, headers, body}` triple for one successful proxy attempt.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl IntoResponse for ProxyResponse {
    fn into_response(self) -> Response {
        let ProxyResponse {
            status,
            mut headers,
            body,
        } = self;

        strip_hop_by_hop(&mut headers);
        let body = body.with_framing(Framing::Identity);

        let mut response = Response::new(Body::from_stream(body.into_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}
