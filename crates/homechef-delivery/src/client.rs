//! HTTP client for signed webhook delivery.
//!
//! Builds the outbound request subscribers depend on, enforces a total
//! deadline, never follows redirects, and turns the response into either a
//! `DeliveryResponse` or a transport-level `DeliveryError`.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use homechef_core::{
    signing::{self, DEFAULT_SIGNATURE_HEADER},
    Clock, DeliveryId,
};
use reqwest::{header::HeaderMap, Response};
use tracing::{info_span, Instrument};

use crate::error::{DeliveryError, Result};

/// Longest response body kept on a delivery record.
pub const MAX_RESPONSE_BODY_BYTES: usize = 4 * 1024;

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-HomeChef-Event";
/// Header carrying the delivery id, usable as an idempotency key.
pub const DELIVERY_HEADER: &str = "X-HomeChef-Delivery";
/// Header carrying the send time in unix seconds.
pub const TIMESTAMP_HEADER: &str = "X-HomeChef-Timestamp";

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Total deadline covering connect, write and read.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Name of the signature header.
    pub signature_header: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "HomeChef-Webhooks/1.0".to_string(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
        }
    }
}

/// HTTP client used by dispatcher workers and test pings.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

/// One outbound attempt.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Delivery lineage id, sent as `X-HomeChef-Delivery`.
    pub delivery_id: DeliveryId,
    /// Wire name of the event type.
    pub event_type: String,
    /// Destination URL.
    pub url: String,
    /// Exact payload bytes.
    pub body: Bytes,
    /// `sha256=<hex>` signature of `body`.
    pub signature: String,
    /// Endpoint custom headers.
    pub custom_headers: BTreeMap<String, String>,
    /// Attempt number, for logs only.
    pub attempt_number: i32,
}

impl DeliveryRequest {
    /// Builds a request and signs `body` with the endpoint secret.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the secret cannot key the MAC.
    pub fn signed(
        delivery_id: DeliveryId,
        event_type: impl Into<String>,
        url: impl Into<String>,
        body: Bytes,
        secret: &str,
        custom_headers: BTreeMap<String, String>,
        attempt_number: i32,
    ) -> Result<Self> {
        let signature = signing::sign(&body, secret)
            .map_err(|e| DeliveryError::configuration(format!("cannot sign payload: {e}")))?;

        Ok(Self {
            delivery_id,
            event_type: event_type.into(),
            url: url.into(),
            body,
            signature,
            custom_headers,
            attempt_number,
        })
    }
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Body truncated to `MAX_RESPONSE_BODY_BYTES`.
    pub body: String,
    /// Parsed `Retry-After`, if present and valid.
    pub retry_after_seconds: Option<u64>,
    /// Total duration of the request.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// Whether the subscriber accepted the delivery.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Converts a non-2xx response into its classified error.
    ///
    /// # Errors
    ///
    /// Returns the classified `DeliveryError` for any non-2xx status.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(DeliveryError::from_status(self.status_code, self.body, self.retry_after_seconds))
        }
    }
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Request deadline.
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Header the signature is sent in.
    pub fn signature_header(&self) -> &str {
        &self.config.signature_header
    }

    /// Sends one attempt.
    ///
    /// Any HTTP response, 2xx or not, is returned as `Ok`; callers classify it
    /// with `DeliveryResponse::into_result`.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the deadline elapses
    /// - `NetworkError` for connection and protocol failures
    /// - `ConfigurationError` when the URL or a custom header is unusable
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let span = info_span!(
            "webhook_delivery",
            delivery_id = %request.delivery_id,
            event_type = %request.event_type,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("starting webhook delivery");

            let url = reqwest::Url::parse(&request.url)
                .map_err(|e| DeliveryError::configuration(format!("invalid webhook URL: {e}")))?;

            let mut http_request = self.client.post(url);
            for (key, value) in &request.custom_headers {
                if !is_managed_header(key) {
                    http_request = http_request.header(key, value);
                }
            }

            let timestamp = self.clock.now_utc().timestamp();
            http_request = http_request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(EVENT_HEADER, &request.event_type)
                .header(DELIVERY_HEADER, request.delivery_id.to_string())
                .header(TIMESTAMP_HEADER, timestamp.to_string())
                .header(self.config.signature_header.as_str(), &request.signature)
                .body(request.body.clone());

            let response = match http_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "request failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_builder() {
                        return Err(DeliveryError::configuration(e.to_string()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let delivery_response = self.parse_response(response, start_time).await?;

            match delivery_response.status_code {
                200..=299 => tracing::info!(
                    status = delivery_response.status_code,
                    duration_ms = delivery_response.duration.as_millis(),
                    "webhook delivered"
                ),
                status => tracing::warn!(
                    status,
                    duration_ms = delivery_response.duration.as_millis(),
                    "subscriber rejected webhook"
                ),
            }

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    async fn parse_response(
        &self,
        response: Response,
        start_time: std::time::Instant,
    ) -> Result<DeliveryResponse> {
        let status_code = response.status().as_u16();
        let retry_after_seconds = extract_retry_after_seconds(response.headers(), self.clock.now_utc());

        let body = match response.bytes().await {
            Ok(bytes) => truncate_body(&bytes),
            Err(e) if e.is_timeout() => {
                return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
            },
            Err(e) => {
                tracing::warn!("failed to read response body: {}", e);
                String::new()
            },
        };

        Ok(DeliveryResponse { status_code, body, retry_after_seconds, duration: start_time.elapsed() })
    }
}

/// Lossy UTF-8 of at most `MAX_RESPONSE_BODY_BYTES` bytes, cut on a character
/// boundary.
pub fn truncate_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_RESPONSE_BODY_BYTES)]);
    if text.len() <= MAX_RESPONSE_BODY_BYTES {
        return text.into_owned();
    }

    let mut end = MAX_RESPONSE_BODY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Headers the engine sets itself; custom headers never override them.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    lowercase.starts_with("x-homechef-")
        || matches!(
            lowercase.as_str(),
            "content-type"
                | "content-length"
                | "host"
                | "user-agent"
                | "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailer"
                | "transfer-encoding"
                | "upgrade"
        )
}

/// Parses `Retry-After` as delay-seconds or an HTTP-date relative to `now`.
///
/// Returns `None` when the header is absent or unparseable. Dates in the past
/// yield zero.
pub fn extract_retry_after_seconds(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }

    let retry_time = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = retry_time.signed_duration_since(now).num_seconds();
    Some(u64::try_from(wait).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use homechef_core::TestClock;
    use reqwest::header::HeaderValue;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> DeliveryClient {
        DeliveryClient::new(ClientConfig::default(), Arc::new(TestClock::new())).unwrap()
    }

    fn request(url: String) -> DeliveryRequest {
        DeliveryRequest::signed(
            DeliveryId::new(),
            "order.created",
            url,
            Bytes::from_static(br#"{"id":"o1"}"#),
            "secret",
            BTreeMap::new(),
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn successful_delivery() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/webhook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&mock_server)
            .await;

        let response =
            client().deliver(request(format!("{}/webhook", mock_server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert!(response.is_success());
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn non_success_status_is_returned_for_classification() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&mock_server)
            .await;

        let response =
            client().deliver(request(format!("{}/webhook", mock_server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 404);
        let err = response.into_result().unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.body(), Some("Not Found"));
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(302).append_header("Location", "https://elsewhere.test/"),
            )
            .mount(&mock_server)
            .await;

        let response =
            client().deliver(request(format!("{}/webhook", mock_server.uri()))).await.unwrap();

        assert_eq!(response.status_code, 302);
        assert!(!response.into_result().unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_with_retry_after() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string("Too Many Requests")
                    .append_header("Retry-After", "120"),
            )
            .mount(&mock_server)
            .await;

        let response =
            client().deliver(request(format!("{}/webhook", mock_server.uri()))).await.unwrap();

        assert_eq!(response.retry_after_seconds, Some(120));
        let err = response.into_result().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_seconds(), Some(120));
    }

    #[tokio::test]
    async fn slow_subscriber_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(100), ..Default::default() };
        let client = DeliveryClient::new(config, Arc::new(TestClock::new())).unwrap();

        let err = client.deliver(request(format!("{}/webhook", mock_server.uri()))).await;
        assert!(matches!(err, Err(DeliveryError::Timeout { .. })));
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        let err = client().deliver(request("http://127.0.0.1:1/webhook".into())).await;
        assert!(matches!(err, Err(DeliveryError::NetworkError { .. })));
    }

    #[test]
    fn retry_after_accepts_seconds_and_http_dates() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2026 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("5"));
        assert_eq!(extract_retry_after_seconds(&headers, now), Some(5));

        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2026 07:30:00 GMT"));
        assert_eq!(extract_retry_after_seconds(&headers, now), Some(120));

        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2026 07:00:00 GMT"));
        assert_eq!(extract_retry_after_seconds(&headers, now), Some(0));

        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(extract_retry_after_seconds(&headers, now), None);

        assert_eq!(extract_retry_after_seconds(&HeaderMap::new(), now), None);
    }

    #[test]
    fn body_truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_RESPONSE_BODY_BYTES);
        let truncated = truncate_body(long.as_bytes());
        assert!(truncated.len() <= MAX_RESPONSE_BODY_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));

        assert_eq!(truncate_body(b"short"), "short");
    }

    #[test]
    fn managed_headers_cannot_be_overridden() {
        assert!(is_managed_header("Content-Type"));
        assert!(is_managed_header("x-homechef-signature"));
        assert!(is_managed_header("Transfer-Encoding"));
        assert!(!is_managed_header("X-Tenant"));
    }
}
