//! Proxy testbed
//!
//! An origin server that puts a reverse proxy under realistic pressure.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                 PROXY TESTBED                │
//!   proxy under test │  ┌────────┐   ┌───────────┐                  │
//!   ─────────────────┼─▶│  http  │──▶│ handlers  │                  │
//!                    │  │ server │   └─────┬─────┘                  │
//!                    │  └────────┘         │                        │
//!                    │     ┌───────────────┼───────────────┐        │
//!                    │     ▼               ▼               ▼        │
//!                    │ ┌────────┐    ┌──────────┐    ┌──────────┐   │
//!                    │ │transfer│    │  stream  │    │    ws    │   │
//!                    │ │ codec  │    │ producer │    │   hub    │   │
//!                    │ └────────┘    └──────────┘    └──────────┘   │
//!                    │                ┌──────────┐                  │
//!                    │                │ loadtest │                  │
//!                    │                │ harness  │                  │
//!                    │                └──────────┘                  │
//!                    │  config · lifecycle · net · observability    │
//!                    └──────────────────────────────────────────────┘
//! ```

use tokio::net::TcpListener;

use proxy_testbed::config::loader::load_from_env;
use proxy_testbed::lifecycle::signals::wait_for_signal;
use proxy_testbed::lifecycle::Shutdown;
use proxy_testbed::observability::{logging, metrics};
use proxy_testbed::HttpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_from_env()?;
    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "proxy-testbed starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        max_body_size = config.security.max_body_size,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, shutdown.subscribe());

    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();
    });
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
