//! Proxy decision boundary.

use axum::body::Body;
use axum::http::Request;

/// What to do with one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyDirective {
    /// Hand the request to the next handler untouched.
    Skip,
    /// Forward to this absolute URI (query string included).
    Forward(String),
}

impl From<Option<String>> for ProxyDirective {
    fn from(destination: Option<String>) -> Self {
        match destination {
            Some(uri) => ProxyDirective::Forward(uri),
            None => ProxyDirective::Skip,
        }
    }
}

/// Decides, once per request, whether and where to proxy it.
///
/// Evaluation must not consume the body. Any
/// `Fn(&Request<Body>) -> Option<String>` closure is a predicate.
pub trait ProxyPredicate: Send + Sync {
    fn evaluate(&self, request: &Request<Body>) -> ProxyDirective;
}

impl<F> ProxyPredicate for F
where
    F: Fn(&Request<Body>) -> Option<String> + Send + Sync,
{
    fn evaluate(&self, request: &Request<Body>) -> ProxyDirective {
        self(request).into()
    }
}
