//! HTTP Server
//!
//! One axum router for the client API, health checks and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /api/stock-price` - Server-sent price stream, or the latest price as
//!   JSON when the service runs in polling mode
//! - `DELETE /api/stock-price` - Stop the pipeline
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (checks broker links)
//! - `GET /metrics` - Prometheus metrics in text format, when enabled

mod api;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use api::ApiError;
pub use health::{HealthResponse, HealthStatus};

use crate::application::services::FanoutService;
use crate::infrastructure::config::DeliveryMode;

/// Route serving the client API.
pub const PRICE_ROUTE: &str = "/api/stock-price";

// =============================================================================
// Server State
// =============================================================================

/// Shared state for every route.
pub struct HttpState {
    version: String,
    started_at: Instant,
    service: Arc<FanoutService>,
    delivery_mode: DeliveryMode,
}

impl HttpState {
    /// Create new server state.
    #[must_use]
    pub fn new(version: String, service: Arc<FanoutService>, delivery_mode: DeliveryMode) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            service,
            delivery_mode,
        }
    }

    /// The pipeline behind the API.
    #[must_use]
    pub const fn service(&self) -> &Arc<FanoutService> {
        &self.service
    }

    /// How `GET /api/stock-price` answers.
    #[must_use]
    pub const fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }
}

/// Build the router.
///
/// `/metrics` is only mounted when `metrics_enabled` is set.
pub fn router(state: Arc<HttpState>, metrics_enabled: bool) -> Router {
    let router = Router::new()
        .route(
            PRICE_ROUTE,
            get(api::get_price).delete(api::stop_service),
        )
        .route("/health", get(health::health_handler))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler));

    let router = if metrics_enabled {
        router.route("/metrics", get(health::metrics_handler))
    } else {
        router
    };

    router.with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// The service's HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    metrics_enabled: bool,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(
        port: u16,
        state: Arc<HttpState>,
        metrics_enabled: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state,
            metrics_enabled,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// Open streams are ended by [`FanoutService::stop`], not by this server.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state, self.metrics_enabled);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
