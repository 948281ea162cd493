//! Periodic sweep that claims due retries and hands them to the dispatcher.
//!
//! The scheduler is the only source of retry dispatch. Each tick claims up to
//! `batch_limit` due deliveries under a lease, fails those whose endpoint is
//! gone or paused, and submits the rest. Because claims are leased, a crashed
//! process or a lost job is picked up again once the lease lapses.

use std::{collections::HashMap, sync::Arc, time::Duration};

use homechef_core::{Claim, Clock, CoreError, Endpoint, EndpointId, Store};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::{lease_duration, DispatchJob, DispatchQueue, ENDPOINT_DELETED, ENDPOINT_INACTIVE},
    engine::EngineStats,
};

/// Counts from one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Deliveries claimed from the store.
    pub claimed: usize,
    /// Deliveries handed to the dispatcher.
    pub dispatched: usize,
    /// Deliveries failed because their endpoint was deleted or paused.
    pub failed: usize,
    /// Deliveries released back to pending because the dispatcher closed.
    pub released: usize,
}

/// Retry scheduler.
pub struct RetryScheduler {
    store: Arc<dyn Store>,
    queue: DispatchQueue,
    clock: Arc<dyn Clock>,
    batch_limit: usize,
    lease: Duration,
    stats: Arc<RwLock<EngineStats>>,
}

impl RetryScheduler {
    /// Creates a scheduler that submits into `queue`.
    pub fn new(
        store: Arc<dyn Store>,
        queue: DispatchQueue,
        clock: Arc<dyn Clock>,
        batch_limit: usize,
        lease: Duration,
        stats: Arc<RwLock<EngineStats>>,
    ) -> Self {
        Self { store, queue, clock, batch_limit: batch_limit.max(1), lease, stats }
    }

    /// Runs one sweep.
    ///
    /// # Errors
    ///
    /// Returns the store error if the claim itself fails. Per-delivery
    /// failures are logged and left to lease expiry.
    pub async fn tick(&self) -> Result<TickReport, CoreError> {
        let now = self.clock.now_utc();
        let lease_until = now + lease_duration(self.lease);

        let claimed = self.store.claim_due_retries(now, self.batch_limit, lease_until).await?;
        let mut report = TickReport { claimed: claimed.len(), ..TickReport::default() };
        if claimed.is_empty() {
            return Ok(report);
        }
        debug!(claimed = claimed.len(), "claimed due deliveries");

        let mut endpoints: HashMap<EndpointId, Option<Endpoint>> = HashMap::new();
        for delivery in claimed {
            let endpoint = match endpoints.get(&delivery.endpoint_id) {
                Some(cached) => cached.clone(),
                None => match self.store.get_endpoint(delivery.endpoint_id).await {
                    Ok(found) => {
                        endpoints.insert(delivery.endpoint_id, found.clone());
                        found
                    },
                    Err(error) => {
                        warn!(
                            delivery_id = %delivery.id,
                            error = %error,
                            "endpoint lookup failed, leaving claim to expire"
                        );
                        continue;
                    },
                },
            };

            let endpoint = match endpoint {
                Some(endpoint) if endpoint.is_active => endpoint,
                other => {
                    let reason = if other.is_some() { ENDPOINT_INACTIVE } else { ENDPOINT_DELETED };
                    match self.store.fail_delivery(delivery.id, reason, now).await {
                        Ok(true) => {
                            report.failed += 1;
                            self.stats.write().await.permanent_failures += 1;
                            info!(delivery_id = %delivery.id, reason, "delivery failed without attempt");
                        },
                        Ok(false) => {},
                        Err(error) => {
                            warn!(delivery_id = %delivery.id, error = %error, "failed to fail delivery");
                        },
                    }
                    continue;
                },
            };

            let claim = Claim { delivery_id: delivery.id, lease: lease_until };
            match self.queue.submit(DispatchJob { endpoint, claim }).await {
                Ok(()) => report.dispatched += 1,
                Err(error) => {
                    debug!(delivery_id = %delivery.id, error = %error, "dispatcher closed");
                    match self.store.release_deliveries(&[claim], now).await {
                        Ok(released) => report.released += usize::try_from(released).unwrap_or(0),
                        Err(error) => {
                            warn!(delivery_id = %delivery.id, error = %error, "release failed");
                        },
                    }
                },
            }
        }

        Ok(report)
    }

    /// Ticks every `period` until cancelled. The first tick runs immediately.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!(interval_seconds = period.as_secs(), "retry scheduler starting");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.claimed > 0 => {
                            info!(
                                claimed = report.claimed,
                                dispatched = report.dispatched,
                                failed = report.failed,
                                "retry sweep completed"
                            );
                        },
                        Ok(_) => {},
                        Err(error) => error!(error = %error, "retry sweep failed"),
                    }
                }
            }
        }

        info!("retry scheduler stopped");
    }
}
