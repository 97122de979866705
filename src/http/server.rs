//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with every testbed endpoint
//! - Wire up middleware (request ID, tracing, metrics, limits)
//! - Keep timeouts and body limits off the streaming and load routes
//! - Start the hub task and serve until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::HarnessConfig;
use crate::http::handlers::{echo, loadtest, stream, transfer, websocket};
use crate::lifecycle::ShutdownSignal;
use crate::loadtest::{HarnessLimits, LoadHarness, StatsRecorder};
use crate::net::ConnectionTracker;
use crate::observability::metrics;
use crate::ws::{ConnectionHub, HubTask};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HarnessConfig>,
    pub hub: ConnectionHub,
    pub recorder: StatsRecorder,
    pub harness: LoadHarness,
    pub shutdown: ShutdownSignal,
    pub streams: ConnectionTracker,
    pub sockets: ConnectionTracker,
    pub started: Instant,
}

/// HTTP server for the testbed.
pub struct HttpServer {
    router: Router,
    state: AppState,
    hub_task: HubTask,
}

impl HttpServer {
    /// Create a new HTTP server. Nothing runs until [`HttpServer::run`].
    pub fn new(config: HarnessConfig, shutdown: ShutdownSignal) -> Self {
        let config = Arc::new(config);
        let (hub, hub_task) = ConnectionHub::new();

        let state = AppState {
            harness: LoadHarness::new(HarnessLimits::from_config(&config.load_test)),
            config: Arc::clone(&config),
            hub,
            recorder: StatsRecorder::new(),
            shutdown,
            streams: ConnectionTracker::new("stream"),
            sockets: ConnectionTracker::new("websocket"),
            started: Instant::now(),
        };

        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            state,
            hub_task,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &HarnessConfig, state: AppState) -> Router {
        let body_limit = config.security.max_body_size;

        // Bounded request/response routes.
        let short = Router::new()
            .route("/api/broadcast", post(websocket::broadcast_api))
            .route("/api/ws/clients", get(websocket::client_count))
            .route("/api/test", any(echo::request_info))
            .route("/api/version", get(echo::version))
            .route("/health", get(echo::health))
            .route("/test/batch", post(loadtest::batch))
            .route("/test/stats", get(loadtest::stats))
            .route("/test/reset", post(loadtest::reset))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestBodyLimitLayer::new(body_limit));

        // Streams, large transfers, sockets and load runs: no timeout.
        let long = Router::new()
            .route(
                "/api/transfer/chunked",
                get(transfer::send_chunked)
                    .merge(post(transfer::receive_chunked).layer(RequestBodyLimitLayer::new(body_limit))),
            )
            .route("/api/transfer/chunked/stream", get(transfer::stream_chunked))
            .route("/api/transfer/chunked/upload", post(transfer::upload_chunked))
            .route("/api/transfer/large/{size}", get(transfer::send_large))
            .route("/api/transfer/large", post(transfer::receive_large))
            .route("/api/transfer/stream/sse", get(transfer::send_sse))
            .route("/api/stream/{lines}", get(stream::stream_lines))
            .route("/api/sse", get(stream::stream_events))
            .route("/ws/connect", any(websocket::connect))
            .route("/ws/echo", any(websocket::echo))
            .route("/ws/broadcast", any(websocket::broadcast))
            .route("/ws/chat", any(websocket::chat))
            .route("/ws/realtime", any(websocket::realtime))
            .route("/ws/heartbeat", any(websocket::heartbeat))
            .route("/ws/binary", any(websocket::binary))
            .route("/ws/performance", any(websocket::performance))
            .route("/test/concurrent", get(loadtest::concurrent).post(loadtest::concurrent))
            .route("/test/stress", get(loadtest::stress).post(loadtest::stress))
            .route("/test/load", get(loadtest::load));

        short
            .merge(long)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(middleware::from_fn(metrics::track_requests)),
            )
    }

    /// Handler state, shared with the router.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut shutdown = self.state.shutdown.clone();
        tokio::spawn(self.hub_task.run(shutdown.clone()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
