//! HTTP Price Source
//!
//! One uncached `GET` per fetch against the upstream price endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};

use crate::application::ports::{PriceSource, PriceSourceError};
use crate::domain::price::PriceEvent;

/// Fetches `{ "price": number, "timestamp": string }` from a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPriceSource {
    /// Create a source for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PriceSourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| PriceSourceError::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// The endpoint being polled.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_price(&self) -> Result<PriceEvent, PriceSourceError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PriceSourceError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PriceSourceError::UpstreamUnavailable(format!(
                "upstream returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PriceSourceError::UpstreamUnavailable(e.to_string()))?;

        PriceEvent::from_json(&body).map_err(|e| PriceSourceError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn source_for(server: &MockServer) -> HttpPriceSource {
        HttpPriceSource::new(
            format!("{}/api/stocks/heat-engineer/current", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn parses_a_valid_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/stocks/heat-engineer/current"))
            .and(header("cache-control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"price":101.5,"timestamp":"2024-01-01T00:00:00Z"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let event = source_for(&server).await.fetch_price().await.unwrap();

        assert_eq!(event.price(), 101.5);
        assert_eq!(event.timestamp(), "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn non_success_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = source_for(&server).await.fetch_price().await.unwrap_err();
        assert!(matches!(err, PriceSourceError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn non_numeric_price_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"price":"cheap","timestamp":"t"}"#),
            )
            .mount(&server)
            .await;

        let err = source_for(&server).await.fetch_price().await.unwrap_err();
        assert!(matches!(err, PriceSourceError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn non_positive_price_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"price":-1,"timestamp":"t"}"#),
            )
            .mount(&server)
            .await;

        let err = source_for(&server).await.fetch_price().await.unwrap_err();
        assert!(matches!(err, PriceSourceError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let source = HttpPriceSource::new("http://127.0.0.1:9/price", Duration::from_millis(500))
            .unwrap();

        let err = source.fetch_price().await.unwrap_err();
        assert!(matches!(err, PriceSourceError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn does_not_retry_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let _ = source_for(&server).await.fetch_price().await;
        server.verify().await;
    }
}
