//! HTTP server setup.
//!
//! # Responsibilities
//! - Wrap the embedding application's Router with the proxy middleware
//! - Wire up request ID, timeout and trace layers
//! - Serve with graceful shutdown, then drain in-flight workers

use axum::{middleware, Router};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::proxy::{streaming_proxy_middleware, ProxyPredicate, StreamingProxy};

/// Upper bound on waiting for live workers after the listener stops.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP server hosting an application behind the streaming proxy.
pub struct HttpServer {
    router: Router,
    proxy: StreamingProxy,
}

impl HttpServer {
    /// Build the server around `app`. Requests the predicate forwards never
    /// reach `app`.
    pub fn new<P>(config: &ProxyConfig, app: Router, predicate: P) -> Self
    where
        P: ProxyPredicate + 'static,
    {
        let proxy = StreamingProxy::new(config, predicate);
        let router = Self::build_router(config, app, proxy.clone());
        Self { router, proxy }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, app: Router, proxy: StreamingProxy) -> Router {
        app.layer(middleware::from_fn_with_state(proxy, streaming_proxy_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for serving or driving with `oneshot`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn proxy(&self) -> &StreamingProxy {
        &self.proxy
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        let tracker = self.proxy.tracker();
        if !tracker.wait_idle(WORKER_DRAIN_TIMEOUT).await {
            tracing::warn!(live = tracker.live(), "Workers still running at shutdown");
        }

        tracing::info!(
            spawned = tracker.spawned(),
            reaped = tracker.reaped(),
            "HTTP server stopped"
        );
        Ok(())
    }
}
