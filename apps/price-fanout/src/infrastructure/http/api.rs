//! Client API handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::json;

use super::HttpState;
use crate::application::services::FanoutError;
use crate::domain::price::error_sse_frame;
use crate::infrastructure::config::DeliveryMode;

/// Message returned to polling clients when no price is available.
const FETCH_FAILED: &str = "Failed to fetch stock price";

/// JSON error response: `{"error": ...}` with status 500.
#[derive(Debug)]
pub enum ApiError {
    /// Polling fetch failed. The cause is logged, not exposed.
    PriceUnavailable(FanoutError),
    /// Stop ran but a teardown step failed.
    StopFailed(FanoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::PriceUnavailable(_) => FETCH_FAILED.to_string(),
            Self::StopFailed(e) => e.to_string(),
        };
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": message })),
        )
            .into_response()
    }
}

pub(super) async fn get_price(State(state): State<Arc<HttpState>>) -> Response {
    match state.delivery_mode() {
        DeliveryMode::Streaming => stream_price(&state).await,
        DeliveryMode::Polling => poll_price(&state).await.into_response(),
    }
}

async fn stream_price(state: &HttpState) -> Response {
    let body = match state.service().attach().await {
        Ok(session) => {
            tracing::debug!(session_id = %session.id(), "Streaming client attached");
            Body::from_stream(session.into_sse_stream().map(Ok::<_, Infallible>))
        }
        Err(e) => Body::from(error_sse_frame(&e.to_string())),
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn poll_price(state: &HttpState) -> Result<impl IntoResponse, ApiError> {
    let event = state.service().latest_price().await.map_err(|e| {
        tracing::error!(error = %e, "Stock price fetch error");
        ApiError::PriceUnavailable(e)
    })?;

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        event.to_json(),
    ))
}

pub(super) async fn stop_service(
    State(state): State<Arc<HttpState>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service()
        .stop()
        .await
        .map_err(ApiError::StopFailed)?;

    Ok(Json(json!({ "status": "stopped" })))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::{MockPriceSource, PriceSourceError};
    use crate::application::services::{FanoutService, PollerMode, ServiceOptions};
    use crate::domain::price::PriceEvent;
    use crate::infrastructure::broadcast::PriceHub;
    use crate::infrastructure::broker::MemoryBroker;
    use crate::infrastructure::http::{PRICE_ROUTE, router};

    fn event(price: f64) -> PriceEvent {
        PriceEvent::new(price, "2024-01-01T00:00:00Z").unwrap()
    }

    fn app(source: MockPriceSource, broker: &MemoryBroker, mode: DeliveryMode) -> axum::Router {
        let service = Arc::new(FanoutService::new(
            ServiceOptions {
                poller_mode: PollerMode::OnDemand,
                ..ServiceOptions::default()
            },
            Arc::new(source),
            Arc::new(broker.clone()),
            Arc::new(PriceHub::with_defaults()),
        ));
        router(
            Arc::new(HttpState::new("test".to_string(), service, mode)),
            false,
        )
    }

    fn failing_source() -> MockPriceSource {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch_price()
            .returning(|| Err(PriceSourceError::UpstreamUnavailable("503".into())));
        source
    }

    fn request(method: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(PRICE_ROUTE)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn polling_returns_latest_price() {
        let mut source = MockPriceSource::new();
        source.expect_fetch_price().returning(|| Ok(event(101.5)));
        let app = app(source, &MemoryBroker::new(), DeliveryMode::Polling);

        let response = app.oneshot(request("GET")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            r#"{"price":101.5,"timestamp":"2024-01-01T00:00:00Z"}"#
        );
    }

    #[tokio::test]
    async fn polling_failure_is_500() {
        let app = app(failing_source(), &MemoryBroker::new(), DeliveryMode::Polling);

        let response = app.oneshot(request("GET")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            r#"{"error":"Failed to fetch stock price"}"#
        );
    }

    #[tokio::test]
    async fn streaming_attach_failure_sends_error_frame() {
        let app = app(failing_source(), &MemoryBroker::new(), DeliveryMode::Streaming);

        let response = app.oneshot(request("GET")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let text = body_text(response).await;
        assert!(text.starts_with("event: error\ndata: {\"error\":"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn streaming_starts_with_snapshot_frame() {
        let mut source = MockPriceSource::new();
        source.expect_fetch_price().returning(|| Ok(event(100.0)));
        let app = app(source, &MemoryBroker::new(), DeliveryMode::Streaming);

        let response = app.oneshot(request("GET")).await.unwrap();
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(
            &first[..],
            b"data: {\"price\":100.0,\"timestamp\":\"2024-01-01T00:00:00Z\"}\n\n"
        );
    }

    #[tokio::test]
    async fn stop_reports_stopped() {
        let app = app(MockPriceSource::new(), &MemoryBroker::new(), DeliveryMode::Streaming);

        let response = app.oneshot(request("DELETE")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"status":"stopped"}"#);
    }

    #[tokio::test]
    async fn stop_failure_is_500_with_message() {
        let mut source = MockPriceSource::new();
        source.expect_fetch_price().returning(|| Ok(event(100.0)));
        let broker = MemoryBroker::new();
        let app = app(source, &broker, DeliveryMode::Streaming);

        let attached = app.clone().oneshot(request("GET")).await.unwrap();
        broker.fail_disconnects(true);
        let response = app.oneshot(request("DELETE")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("disconnect failed"));
        drop(attached);
    }
}
