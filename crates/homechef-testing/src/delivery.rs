//! Delivery helpers for `TestEnv`: endpoint setup, enqueue, and polling.
//!
//! Workers run as real tasks, so waiting is done by polling the store on the
//! tokio timer. Retry scheduling is driven explicitly with `advance_time`
//! plus `tick_scheduler`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use homechef_core::{Delivery, DeliveryId, DeliveryStatus, Endpoint, EventType, Store};
use homechef_delivery::TickReport;

use crate::{fixtures::EndpointBuilder, TestEnv};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default time limit for `wait_*` helpers.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

impl TestEnv {
    /// Registers an endpoint at the env's hook URL through ingress.
    ///
    /// # Errors
    ///
    /// Returns error if ingress rejects the endpoint.
    pub async fn create_endpoint(&self, events: &[EventType]) -> Result<Endpoint> {
        self.create_endpoint_with(EndpointBuilder::new(self.hook_url()).events(events)).await
    }

    /// Registers an endpoint described by `builder` through ingress.
    ///
    /// # Errors
    ///
    /// Returns error if ingress rejects the endpoint.
    pub async fn create_endpoint_with(&self, builder: EndpointBuilder) -> Result<Endpoint> {
        self.ingress()
            .create_endpoint(self.owner(), builder.into_new())
            .await
            .context("failed to create endpoint")
    }

    /// Enqueues an event and returns the created delivery ids.
    ///
    /// # Errors
    ///
    /// Returns error if ingress rejects the event.
    pub async fn enqueue(&self, event_type: EventType, payload: Bytes) -> Result<Vec<DeliveryId>> {
        self.ingress()
            .enqueue(event_type.as_str(), payload)
            .await
            .context("failed to enqueue event")
    }

    /// Reads a delivery from the store.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery does not exist.
    pub async fn delivery(&self, id: DeliveryId) -> Result<Delivery> {
        self.store.get_delivery(id).await?.with_context(|| format!("delivery {id} not found"))
    }

    /// Runs one scheduler tick at the current clock time.
    ///
    /// # Errors
    ///
    /// Returns error if the claim failed.
    pub async fn tick_scheduler(&self) -> Result<TickReport> {
        Ok(self.engine().scheduler().tick().await?)
    }

    /// Polls until `condition` holds for the delivery.
    ///
    /// # Errors
    ///
    /// Returns error on timeout, with the last observed state.
    pub async fn wait_for_delivery<F>(
        &self,
        id: DeliveryId,
        timeout: Duration,
        mut condition: F,
    ) -> Result<Delivery>
    where
        F: FnMut(&Delivery) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let delivery = self.delivery(id).await?;
            if condition(&delivery) {
                return Ok(delivery);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "timeout waiting for delivery {id}: status={} attempts={}",
                    delivery.status,
                    delivery.attempt_count
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until the delivery reaches `status`.
    ///
    /// # Errors
    ///
    /// Returns error on timeout.
    pub async fn wait_for_status(&self, id: DeliveryId, status: DeliveryStatus) -> Result<Delivery> {
        self.wait_for_delivery(id, DEFAULT_WAIT, |d| d.status == status).await
    }

    /// Waits until the delivery has recorded `attempts` attempts and is no
    /// longer mid-attempt.
    ///
    /// # Errors
    ///
    /// Returns error on timeout.
    pub async fn wait_for_attempts(&self, id: DeliveryId, attempts: i32) -> Result<Delivery> {
        self.wait_for_delivery(id, DEFAULT_WAIT, |d| {
            d.attempt_count >= attempts && d.status != DeliveryStatus::Delivering
        })
        .await
    }

    /// Waits until the subscriber has received at least `count` requests.
    ///
    /// # Errors
    ///
    /// Returns error on timeout.
    pub async fn wait_for_requests(&self, count: usize) -> Result<()> {
        let deadline = tokio::time::Instant::now() + DEFAULT_WAIT;
        loop {
            let received = self.received_requests().await.len();
            if received >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("timeout waiting for {count} requests, saw {received}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Advances the clock past the delivery's next retry and runs a tick.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery has no retry scheduled or the tick failed.
    pub async fn fire_retry(&self, id: DeliveryId) -> Result<TickReport> {
        let delivery = self.delivery(id).await?;
        let due = delivery.next_retry_at.context("delivery has no retry scheduled")?;
        let wait = (due - self.now()).to_std().unwrap_or_default();
        self.advance_time(wait + Duration::from_secs(1));
        self.tick_scheduler().await
    }
}
