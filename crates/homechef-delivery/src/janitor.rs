//! Retention pruning of terminal delivery records.

use std::{sync::Arc, time::Duration};

use homechef_core::{Clock, CoreError, Store};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Deletes terminal deliveries older than the retention horizon.
pub struct Janitor {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl Janitor {
    /// Creates a janitor with the given retention horizon.
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self { store, clock, retention }
    }

    /// Runs one pruning pass and returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns the store error.
    pub async fn sweep(&self) -> Result<u64, CoreError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| CoreError::InvalidInput(format!("retention out of range: {e}")))?;
        let cutoff = self.clock.now_utc() - retention;

        let purged = self.store.purge_older_than(cutoff).await?;
        if purged > 0 {
            info!(purged, %cutoff, "purged expired deliveries");
        }
        Ok(purged)
    }

    /// Sweeps every `period` until cancelled.
    pub async fn run(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!(
            interval_seconds = period.as_secs(),
            retention_days = self.retention.as_secs() / 86_400,
            "janitor starting"
        );

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.sweep().await {
                        error!(error = %error, "retention sweep failed");
                    }
                }
            }
        }

        info!("janitor stopped");
    }
}
