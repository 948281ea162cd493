//! Wiring of registry, dispatcher, scheduler, janitor, and ingress.
//!
//! `DeliveryEngine` owns every background task. `start` loads the registry
//! and spawns the worker pool plus the periodic loops; `shutdown` stops them
//! in dependency order and hands unfinished deliveries back to the store.

use std::{sync::Arc, time::Duration};

use homechef_core::{Clock, Store};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    dispatcher::{DispatchQueue, Dispatcher, DispatcherConfig},
    error::{DeliveryError, Result},
    ingress::{Ingress, IngressConfig},
    janitor::Janitor,
    registry::SubscriptionRegistry,
    retry::RetryPolicy,
    scheduler::RetryScheduler,
};

/// Shortest scheduler tick the engine will run.
const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent delivery workers.
    pub workers: usize,
    /// Global cap on requests in flight.
    pub max_in_flight: usize,
    /// Capacity of the submission channel.
    pub queue_size: usize,
    /// HTTP client configuration.
    pub client: ClientConfig,
    /// Backoff and attempt budget.
    pub retry_policy: RetryPolicy,
    /// Largest accepted payload in bytes.
    pub max_payload_size: usize,
    /// Scheduler tick upper bound.
    pub scan_interval: Duration,
    /// Deliveries claimed per scheduler tick.
    pub batch_limit: usize,
    /// Age after which terminal deliveries are purged.
    pub retention: Duration,
    /// How often the janitor runs.
    pub cleanup_interval: Duration,
    /// How often the registry is reconciled against the store.
    pub reconcile_interval: Duration,
    /// Time in-flight attempts get to finish during shutdown.
    pub shutdown_grace: Duration,
    /// Delay applied to fresh deliveries when the queue is full.
    pub backpressure_delay: Duration,
    /// Delay applied to a job whose endpoint is at its concurrency cap.
    pub busy_endpoint_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: crate::DEFAULT_WORKER_COUNT,
            max_in_flight: crate::DEFAULT_WORKER_COUNT,
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            client: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            max_payload_size: crate::DEFAULT_MAX_PAYLOAD_SIZE,
            scan_interval: Duration::from_secs(60),
            batch_limit: crate::DEFAULT_BATCH_LIMIT,
            retention: Duration::from_secs(30 * 86_400),
            cleanup_interval: Duration::from_secs(86_400),
            reconcile_interval: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(30),
            backpressure_delay: Duration::from_secs(5),
            busy_endpoint_delay: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Lease held on a delivery while an attempt may be running.
    pub fn lease(&self) -> Duration {
        self.client.timeout.saturating_mul(2)
    }

    /// Scheduler tick: the configured interval or half the base delay,
    /// whichever is smaller, never below one second.
    pub fn effective_scan_interval(&self) -> Duration {
        self.scan_interval.min(self.retry_policy.base_delay / 2).max(MIN_SCAN_INTERVAL)
    }
}

/// Statistics for delivery engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of active delivery workers.
    pub active_workers: usize,
    /// Attempts started since startup.
    pub attempts_made: u64,
    /// Attempts that ended in success.
    pub successful_deliveries: u64,
    /// Attempts that scheduled a retry.
    pub retries_scheduled: u64,
    /// Deliveries that ended failed.
    pub permanent_failures: u64,
    /// Attempts currently running.
    pub in_flight_deliveries: u64,
    /// Jobs handed back because their endpoint was at its concurrency cap.
    pub deferred_deliveries: u64,
}

/// Main delivery engine.
pub struct DeliveryEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    registry: Arc<SubscriptionRegistry>,
    ingress: Arc<Ingress>,
    scheduler: Arc<RetryScheduler>,
    janitor: Arc<Janitor>,
    dispatcher: Dispatcher,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl DeliveryEngine {
    /// Creates an engine. Nothing runs until `start`.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery client cannot be initialized.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: EngineConfig) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client.clone(), clock.clone())?);
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let lease = config.lease();

        let dispatcher = Dispatcher::new(
            store.clone(),
            client.clone(),
            clock.clone(),
            DispatcherConfig {
                workers: config.workers,
                max_in_flight: config.max_in_flight,
                queue_size: config.queue_size,
                lease,
                busy_delay: config.busy_endpoint_delay,
                retry_policy: config.retry_policy.clone(),
            },
            stats.clone(),
        );
        let queue = dispatcher.queue();

        let registry = Arc::new(SubscriptionRegistry::new(store.clone()));
        let ingress = Arc::new(Ingress::new(
            store.clone(),
            registry.clone(),
            queue.clone(),
            client,
            clock.clone(),
            IngressConfig {
                max_payload_size: config.max_payload_size,
                lease,
                backpressure_delay: config.backpressure_delay,
            },
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            store.clone(),
            queue,
            clock.clone(),
            config.batch_limit,
            lease,
            stats.clone(),
        ));
        let janitor = Arc::new(Janitor::new(store.clone(), clock.clone(), config.retention));

        Ok(Self {
            store,
            clock,
            config,
            registry,
            ingress,
            scheduler,
            janitor,
            dispatcher,
            stats,
            cancellation_token: CancellationToken::new(),
            background: Vec::new(),
        })
    }

    /// Loads the registry and spawns workers and periodic loops.
    ///
    /// A registry load failure is logged, not fatal: lookups fall back to the
    /// store until the reconciler succeeds.
    pub async fn start(&mut self) {
        info!(
            workers = self.config.workers,
            max_in_flight = self.config.max_in_flight,
            max_attempts = self.config.retry_policy.max_attempts,
            "starting webhook delivery engine"
        );

        match self.registry.rebuild().await {
            Ok(count) => info!(active_endpoints = count, "subscription registry loaded"),
            Err(error) => warn!(error = %error, "subscription registry load failed"),
        }

        self.dispatcher.spawn_workers().await;

        let cancel = &self.cancellation_token;
        self.background.push(tokio::spawn(
            self.scheduler
                .clone()
                .run(self.config.effective_scan_interval(), cancel.clone()),
        ));
        self.background.push(tokio::spawn(
            self.janitor.clone().run(self.config.cleanup_interval, cancel.clone()),
        ));
        self.background.push(tokio::spawn(
            self.registry
                .clone()
                .run_reconciler(self.config.reconcile_interval, cancel.clone()),
        ));

        info!("delivery engine started successfully");
    }

    /// Producer and management entry points.
    pub fn ingress(&self) -> Arc<Ingress> {
        self.ingress.clone()
    }

    /// Retry scheduler, for driving ticks directly.
    pub fn scheduler(&self) -> Arc<RetryScheduler> {
        self.scheduler.clone()
    }

    /// Retention janitor.
    pub fn janitor(&self) -> Arc<Janitor> {
        self.janitor.clone()
    }

    /// Subscription registry.
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Dispatcher submission handle.
    pub fn queue(&self) -> DispatchQueue {
        self.dispatcher.queue()
    }

    /// Worker pool.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Backing store.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Time source shared by every component.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Gracefully shuts down the engine.
    ///
    /// Ingress stops accepting events, the periodic loops stop claiming, and
    /// workers get the grace period to finish. Deliveries still queued or
    /// mid-attempt afterwards are released to pending, due now.
    ///
    /// # Errors
    ///
    /// Returns error if the release could not be persisted. Those deliveries
    /// are recovered once their lease expires.
    pub async fn shutdown(mut self) -> Result<EngineStats> {
        info!("shutting down delivery engine");

        self.ingress.close();
        self.cancellation_token.cancel();

        let background = std::mem::take(&mut self.background);
        if tokio::time::timeout(self.config.shutdown_grace, futures::future::join_all(background))
            .await
            .is_err()
        {
            warn!("background loops did not stop within the grace period");
        }

        let report = self.dispatcher.shutdown_graceful(self.config.shutdown_grace).await;
        let unfinished: Vec<_> = report.queued.iter().chain(&report.in_flight).copied().collect();

        if !unfinished.is_empty() {
            let now = self.clock.now_utc();
            match self.store.release_deliveries(&unfinished, now).await {
                Ok(released) => info!(
                    released,
                    queued = report.queued.len(),
                    in_flight = report.in_flight.len(),
                    "released unfinished deliveries"
                ),
                Err(error) => {
                    error!(error = %error, "failed to release unfinished deliveries");
                    return Err(DeliveryError::from(error));
                },
            }
        }

        let stats = self.stats.read().await.clone();
        info!(
            graceful = report.graceful,
            attempts = stats.attempts_made,
            succeeded = stats.successful_deliveries,
            retries_scheduled = stats.retries_scheduled,
            permanent_failures = stats.permanent_failures,
            "delivery engine stopped"
        );
        Ok(stats)
    }
}
