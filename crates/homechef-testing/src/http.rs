//! Subscriber mocks on the env's wiremock server.

use std::time::Duration;

use wiremock::{
    matchers::{method, path},
    Mock, Request, ResponseTemplate,
};

use crate::TestEnv;

/// Path endpoints created through the env receive deliveries on.
pub const HOOK_PATH: &str = "/hook";

impl TestEnv {
    /// Subscriber URL endpoints created through the env point at.
    pub fn hook_url(&self) -> String {
        self.mock_url(HOOK_PATH)
    }

    /// Answers every delivery with `status`.
    pub async fn respond_with(&self, status: u16) {
        self.respond_with_template(ResponseTemplate::new(status)).await;
    }

    /// Answers every delivery with `template`.
    pub async fn respond_with_template(&self, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(HOOK_PATH))
            .respond_with(template)
            .mount(&self.http_mock)
            .await;
    }

    /// Answers deliveries to `route` on the mock server with `template`.
    pub async fn respond_at(&self, route: &str, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(template)
            .mount(&self.http_mock)
            .await;
    }

    /// Answers the next `times` deliveries with `status`, ahead of any
    /// catch-all mock.
    pub async fn respond_with_times(&self, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path(HOOK_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.http_mock)
            .await;
    }

    /// Answers every delivery with `status` after `latency`.
    pub async fn respond_slowly(&self, status: u16, latency: Duration) {
        self.respond_with_template(ResponseTemplate::new(status).set_delay(latency)).await;
    }

    /// Requests the subscriber has received so far.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.http_mock.received_requests().await.unwrap_or_default()
    }

    /// Clears recorded requests and mounted mocks.
    pub async fn reset_mocks(&self) {
        self.http_mock.reset().await;
    }
}
