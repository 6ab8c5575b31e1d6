//! streaming-proxy binary.
//!
//! ```text
//!     Client ──▶ HttpServer ──▶ StreamingProxy ── Skip ──▶ fallback app (404)
//!                                    │
//!                                    └─ Forward(uri) ──▶ worker task ──▶ Upstream
//!                                                          │
//!     Client ◀── ResponseBody ◀── ResponseReader ◀─ frames ┘
//! ```

use axum::http::StatusCode;
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;

use streaming_proxy::config::{load_config, validate_config, ProxyConfig};
use streaming_proxy::lifecycle::{spawn_signal_listener, Shutdown};
use streaming_proxy::observability::{init_logging, metrics};
use streaming_proxy::{HttpServer, RouteTable};

#[derive(Parser, Debug)]
#[command(name = "streaming-proxy", version, about = "Selective streaming reverse proxy")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            eprintln!("config error: {e}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    init_logging(&config.observability);
    tracing::info!("streaming-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rules = config.rules.len(),
        raise_on_5xx = config.streaming.raise_on_5xx,
        num_5xx_retries = config.streaming.num_5xx_retries,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let fallback = Router::new().fallback(|| async { (StatusCode::NOT_FOUND, "No matching rule") });
    let routes = RouteTable::from_config(&config.rules);
    let server = HttpServer::new(&config, fallback, routes);

    let shutdown = Shutdown::new();
    spawn_signal_listener(&shutdown);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
