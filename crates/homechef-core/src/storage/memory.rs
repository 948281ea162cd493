//! In-process implementation of `Store`.
//!
//! Holds endpoints and deliveries behind a single lock, so every operation
//! is atomic with respect to every other. Used by `database_url =
//! "memory://"` deployments and by the test suites. Supports injecting an
//! outage to exercise store-unavailable paths.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::Store;
use crate::{
    error::{CoreError, Result},
    models::{
        AttemptOutcome, Claim, Delivery, DeliveryFilter, DeliveryId, DeliveryStatus, Endpoint,
        EndpointFilter, EndpointId, EndpointPatch, EventType, OwnerId, Page,
    },
};

#[derive(Default)]
struct Inner {
    endpoints: HashMap<EndpointId, Endpoint>,
    deliveries: HashMap<DeliveryId, Delivery>,
}

/// In-memory store with the same semantics as the PostgreSQL store.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
    delivery_capacity: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: RwLock::default(),
            unavailable: AtomicBool::new(false),
            delivery_capacity: AtomicUsize::new(usize::MAX),
        }
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `create_delivery` fail with `CoreError::Database` once the store
    /// holds `capacity` deliveries. `None` lifts the limit.
    pub fn set_delivery_capacity(&self, capacity: Option<usize>) {
        self.delivery_capacity.store(capacity.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// Makes every subsequent call fail with `CoreError::Database` until
    /// reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored deliveries.
    pub async fn delivery_count(&self) -> usize {
        self.inner.read().await.deliveries.len()
    }

    /// Overwrites a delivery record. Test hook for arranging arbitrary state.
    pub async fn put_delivery(&self, delivery: Delivery) {
        self.inner.write().await.deliveries.insert(delivery.id, delivery);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Database("store unavailable".to_string()));
        }
        Ok(())
    }
}

fn is_due(delivery: &Delivery, now: DateTime<Utc>) -> bool {
    match delivery.status {
        DeliveryStatus::Pending => delivery.next_retry_at.is_some_and(|at| at <= now),
        DeliveryStatus::Delivering => delivery.lease_expires_at.is_some_and(|at| at <= now),
        DeliveryStatus::Succeeded | DeliveryStatus::Failed => false,
    }
}

fn holds(delivery: &Delivery, claim: &Claim) -> bool {
    !delivery.status.is_terminal() && delivery.lease_expires_at == Some(claim.lease)
}

fn fail_in_place(delivery: &mut Delivery, reason: &str, now: DateTime<Utc>) {
    delivery.status = DeliveryStatus::Failed;
    delivery.failed_at = Some(now);
    delivery.last_error = Some(reason.to_string());
    delivery.next_retry_at = None;
    delivery.lease_expires_at = None;
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if inner.endpoints.contains_key(&endpoint.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "endpoint {} already exists",
                endpoint.id
            )));
        }
        inner.endpoints.insert(endpoint.id, endpoint.clone());
        Ok(())
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        self.check_available()?;
        Ok(self.inner.read().await.endpoints.get(&id).cloned())
    }

    async fn list_endpoints(
        &self,
        owner: &OwnerId,
        filter: &EndpointFilter,
    ) -> Result<Vec<Endpoint>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut endpoints: Vec<Endpoint> = inner
            .endpoints
            .values()
            .filter(|endpoint| &endpoint.owner_id == owner && filter.matches(endpoint))
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(endpoints)
    }

    async fn list_all_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.check_available()?;
        let mut endpoints: Vec<Endpoint> =
            self.inner.read().await.endpoints.values().cloned().collect();
        endpoints.sort_by_key(|endpoint| endpoint.created_at);
        Ok(endpoints)
    }

    async fn update_endpoint(
        &self,
        id: EndpointId,
        patch: &EndpointPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Endpoint>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        Ok(inner.endpoints.get_mut(&id).map(|endpoint| {
            patch.apply(endpoint, now);
            endpoint.clone()
        }))
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool> {
        self.check_available()?;
        Ok(self.inner.write().await.endpoints.remove(&id).is_some())
    }

    async fn subscribers_for(&self, event_type: EventType) -> Result<Vec<Endpoint>> {
        self.check_available()?;
        let mut endpoints: Vec<Endpoint> = self
            .inner
            .read()
            .await
            .endpoints
            .values()
            .filter(|endpoint| endpoint.receives(event_type))
            .cloned()
            .collect();
        endpoints.sort_by_key(|endpoint| endpoint.created_at);
        Ok(endpoints)
    }

    async fn create_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        if inner.deliveries.len() >= self.delivery_capacity.load(Ordering::SeqCst) {
            return Err(CoreError::Database("delivery storage full".to_string()));
        }
        if inner.deliveries.contains_key(&delivery.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "delivery {} already exists",
                delivery.id
            )));
        }
        inner.deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        self.check_available()?;
        Ok(self.inner.read().await.deliveries.get(&id).cloned())
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter, page: Page) -> Result<Vec<Delivery>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        let mut deliveries: Vec<Delivery> = inner
            .deliveries
            .values()
            .filter(|delivery| filter.matches(delivery))
            .filter(|delivery| {
                filter.owner_id.as_ref().is_none_or(|owner| {
                    inner
                        .endpoints
                        .get(&delivery.endpoint_id)
                        .is_some_and(|endpoint| &endpoint.owner_id == owner)
                })
            })
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(deliveries
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<Delivery>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;

        let mut due: Vec<(DateTime<Utc>, DeliveryId)> = inner
            .deliveries
            .values()
            .filter(|delivery| is_due(delivery, now))
            .map(|delivery| {
                let key = delivery.next_retry_at.or(delivery.lease_expires_at).unwrap_or(now);
                (key, delivery.id)
            })
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(delivery) = inner.deliveries.get_mut(&id) {
                delivery.status = DeliveryStatus::Delivering;
                delivery.next_retry_at = None;
                delivery.lease_expires_at = Some(lease_until);
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn begin_attempt(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(delivery) = inner.deliveries.get_mut(&claim.delivery_id) else {
            return Ok(None);
        };
        if !holds(delivery, claim) {
            return Ok(None);
        }

        delivery.attempt_count += 1;
        delivery.status = DeliveryStatus::Delivering;
        delivery.first_attempted_at.get_or_insert(now);
        delivery.last_attempted_at = Some(now);
        delivery.next_retry_at = None;
        delivery.lease_expires_at = Some(lease_until);
        Ok(Some(delivery.clone()))
    }

    async fn record_attempt(
        &self,
        id: DeliveryId,
        outcome: &AttemptOutcome,
    ) -> Result<Option<Delivery>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let Some(delivery) = inner.deliveries.get_mut(&id) else {
            return Ok(None);
        };
        if delivery.status != DeliveryStatus::Delivering || delivery.attempt_count != outcome.attempt
        {
            return Ok(None);
        }

        outcome.apply(delivery);
        Ok(Some(delivery.clone()))
    }

    async fn fail_delivery(
        &self,
        id: DeliveryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        match inner.deliveries.get_mut(&id) {
            Some(delivery) if !delivery.status.is_terminal() => {
                fail_in_place(delivery, reason, now);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn fail_pending_for_endpoint(
        &self,
        endpoint_id: EndpointId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let mut failed = 0;
        for delivery in inner.deliveries.values_mut() {
            if delivery.endpoint_id == endpoint_id && delivery.status == DeliveryStatus::Pending {
                fail_in_place(delivery, reason, now);
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn requeue_failed(&self, id: DeliveryId, now: DateTime<Utc>) -> Result<Option<Delivery>> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        match inner.deliveries.get_mut(&id) {
            Some(delivery) if delivery.status == DeliveryStatus::Failed => {
                delivery.status = DeliveryStatus::Pending;
                delivery.next_retry_at = Some(now);
                delivery.failed_at = None;
                delivery.lease_expires_at = None;
                Ok(Some(delivery.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn reschedule_delivery(
        &self,
        id: DeliveryId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        match inner.deliveries.get_mut(&id) {
            Some(delivery) if delivery.status == DeliveryStatus::Pending => {
                delivery.next_retry_at = Some(next_retry_at);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn release_deliveries(
        &self,
        claims: &[Claim],
        next_retry_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let mut released = 0;
        for claim in claims {
            if let Some(delivery) = inner.deliveries.get_mut(&claim.delivery_id) {
                if holds(delivery, claim) {
                    delivery.status = DeliveryStatus::Pending;
                    delivery.next_retry_at = Some(next_retry_at);
                    delivery.lease_expires_at = None;
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let before = inner.deliveries.len();
        inner
            .deliveries
            .retain(|_, delivery| !(delivery.status.is_terminal() && delivery.created_at < cutoff));
        Ok((before - inner.deliveries.len()) as u64)
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}
