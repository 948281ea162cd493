//! Construction and basic accessors for `TestEnv`.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use homechef_core::{Clock, MemoryStore, OwnerId, Store, TestClock};
use homechef_delivery::{
    ClientConfig, DeliveryEngine, EngineConfig, EngineStats, Ingress, RetryPolicy,
};

use crate::{TestEnv, DEFAULT_OWNER};

/// Interval long enough that periodic loops only run their first tick.
const IDLE_INTERVAL: Duration = Duration::from_secs(3600);

/// Builder for configuring a `TestEnv`.
pub struct TestEnvBuilder {
    workers: usize,
    max_in_flight: usize,
    queue_size: usize,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    request_timeout: Duration,
    max_payload_size: usize,
    shutdown_grace: Duration,
    start_engine: bool,
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self {
            workers: 2,
            max_in_flight: 2,
            queue_size: 64,
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(2),
            max_payload_size: homechef_delivery::DEFAULT_MAX_PAYLOAD_SIZE,
            shutdown_grace: Duration::from_secs(5),
            start_engine: true,
        }
    }
}

impl TestEnvBuilder {
    /// Creates a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of delivery workers.
    #[must_use]
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = count;
        self.max_in_flight = self.max_in_flight.max(count);
        self
    }

    /// Sets the global in-flight cap.
    #[must_use]
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Sets the dispatch queue capacity.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Sets the attempt budget.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base and cap of the backoff schedule.
    #[must_use]
    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = cap;
        self
    }

    /// Sets the outbound request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the largest accepted payload.
    #[must_use]
    pub fn max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Builds the engine without starting workers or loops.
    #[must_use]
    pub fn without_workers(mut self) -> Self {
        self.start_engine = false;
        self
    }

    /// Engine configuration this builder produces.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            max_in_flight: self.max_in_flight,
            queue_size: self.queue_size,
            client: ClientConfig { timeout: self.request_timeout, ..ClientConfig::default() },
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: self.base_delay,
                max_delay: self.max_delay,
                jitter_factor: 0.0,
            },
            max_payload_size: self.max_payload_size,
            scan_interval: IDLE_INTERVAL,
            batch_limit: 100,
            retention: Duration::from_secs(30 * 86_400),
            cleanup_interval: IDLE_INTERVAL,
            reconcile_interval: IDLE_INTERVAL,
            shutdown_grace: self.shutdown_grace,
            backpressure_delay: Duration::from_secs(5),
            busy_endpoint_delay: Duration::from_secs(1),
        }
    }

    /// Builds the environment and starts the engine.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery engine cannot be created.
    pub async fn build(self) -> Result<TestEnv> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_test_writer()
            .try_init();

        let http_mock = wiremock::MockServer::start().await;
        let clock = TestClock::new();
        let store = Arc::new(MemoryStore::new());

        let mut engine = DeliveryEngine::new(
            store.clone() as Arc<dyn Store>,
            Arc::new(clock.clone()) as Arc<dyn Clock>,
            self.engine_config(),
        )
        .context("failed to create delivery engine")?;

        if self.start_engine {
            engine.start().await;
        }

        Ok(TestEnv {
            http_mock,
            clock,
            store,
            engine: Some(engine),
            owner: OwnerId::new(DEFAULT_OWNER),
        })
    }
}

impl TestEnv {
    /// Environment with default settings and a running engine.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery engine cannot be created.
    pub async fn new() -> Result<Self> {
        TestEnvBuilder::new().build().await
    }

    /// Builder for custom configuration.
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// The in-memory store.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// Owner that endpoints created through the env belong to.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// The delivery engine.
    ///
    /// # Panics
    ///
    /// Panics after `shutdown`.
    pub fn engine(&self) -> &DeliveryEngine {
        self.engine.as_ref().expect("engine already shut down")
    }

    /// Producer and management entry points.
    pub fn ingress(&self) -> Arc<Ingress> {
        self.engine().ingress()
    }

    /// Current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.engine().stats().await
    }

    /// Moves the shared clock forward.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.advance(duration);
    }

    /// Current time on the shared clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now_utc()
    }

    /// Subscriber URL for `path` on the mock server.
    pub fn mock_url(&self, path: &str) -> String {
        format!("{}{path}", self.http_mock.uri())
    }

    /// Shuts the engine down gracefully and returns its final statistics.
    ///
    /// # Errors
    ///
    /// Returns error if the engine was already shut down or the release of
    /// unfinished deliveries failed.
    pub async fn shutdown(&mut self) -> Result<EngineStats> {
        let engine = self.engine.take().context("engine already shut down")?;
        engine.shutdown().await.context("engine shutdown failed")
    }
}
