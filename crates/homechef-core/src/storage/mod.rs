//! Persistence for endpoints and deliveries.
//!
//! `Store` is the contract the engine and the management API program
//! against. `Storage` implements it over PostgreSQL with one repository per
//! table; `memory::MemoryStore` implements the same semantics in process for
//! development and tests.
//!
//! Every state-changing delivery operation is conditional on the current
//! status, so terminal records are never mutated and a losing claimant
//! simply observes "nothing to do".

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub mod deliveries;
pub mod endpoints;
pub mod memory;
pub mod schema;

use crate::{
    error::Result,
    models::{
        AttemptOutcome, Claim, Delivery, DeliveryFilter, DeliveryId, Endpoint, EndpointFilter,
        EndpointId, EndpointPatch, EventType, OwnerId, Page,
    },
};

/// Durable store for endpoints and delivery records.
///
/// Errors are surfaced to the caller unchanged; implementations never retry
/// internally.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Persists a new endpoint.
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    /// Fetches an endpoint by id.
    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>>;

    /// Lists an owner's endpoints, newest first.
    async fn list_endpoints(&self, owner: &OwnerId, filter: &EndpointFilter)
        -> Result<Vec<Endpoint>>;

    /// Lists every endpoint; used to rebuild the subscription registry.
    async fn list_all_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Applies a patch and returns the updated endpoint, or `None` if absent.
    async fn update_endpoint(
        &self,
        id: EndpointId,
        patch: &EndpointPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Endpoint>>;

    /// Deletes an endpoint. Returns false when it did not exist.
    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool>;

    /// All active endpoints subscribed to `event_type`.
    async fn subscribers_for(&self, event_type: EventType) -> Result<Vec<Endpoint>>;

    /// Persists a new delivery.
    async fn create_delivery(&self, delivery: &Delivery) -> Result<()>;

    /// Fetches a delivery by id.
    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>>;

    /// Queries deliveries, newest first.
    async fn list_deliveries(&self, filter: &DeliveryFilter, page: Page) -> Result<Vec<Delivery>>;

    /// Atomically claims up to `limit` due deliveries.
    ///
    /// Due means pending with `next_retry_at <= now`, or delivering with an
    /// expired lease. Claimed rows become delivering with
    /// `lease_expires_at = lease_until` and no `next_retry_at`.
    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<Delivery>>;

    /// Starts an attempt under `claim`: increments `attempt_count`, marks
    /// delivering, stamps attempt times, clears `next_retry_at`, and replaces
    /// the lease with `lease_until`.
    ///
    /// Returns `None` for missing or terminal deliveries and when the stored
    /// lease no longer matches the claim.
    async fn begin_attempt(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Delivery>>;

    /// Records the outcome of the attempt numbered `outcome.attempt`.
    ///
    /// Only applies while the delivery is still delivering at that attempt;
    /// returns `None` otherwise.
    async fn record_attempt(
        &self,
        id: DeliveryId,
        outcome: &AttemptOutcome,
    ) -> Result<Option<Delivery>>;

    /// Terminally fails a non-terminal delivery without an attempt.
    async fn fail_delivery(&self, id: DeliveryId, reason: &str, now: DateTime<Utc>)
        -> Result<bool>;

    /// Fails every pending delivery for an endpoint. Returns the count.
    async fn fail_pending_for_endpoint(
        &self,
        endpoint_id: EndpointId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// Moves a failed delivery back to pending, due at `now`, keeping its
    /// attempt count. Returns `None` unless the delivery was failed.
    async fn requeue_failed(&self, id: DeliveryId, now: DateTime<Utc>) -> Result<Option<Delivery>>;

    /// Moves a pending delivery's due time.
    async fn reschedule_delivery(&self, id: DeliveryId, next_retry_at: DateTime<Utc>)
        -> Result<bool>;

    /// Returns claimed deliveries to pending, due at `next_retry_at`.
    ///
    /// Claims whose lease has since been replaced are skipped. Returns the
    /// number of deliveries released.
    async fn release_deliveries(&self, claims: &[Claim], next_retry_at: DateTime<Utc>)
        -> Result<u64>;

    /// Deletes terminal deliveries created before `cutoff`.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Verifies connectivity.
    async fn health_check(&self) -> Result<()>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct Storage {
    /// Repository for endpoint configuration.
    pub endpoints: Arc<endpoints::Repository>,

    /// Repository for delivery records.
    pub deliveries: Arc<deliveries::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            endpoints: Arc::new(endpoints::Repository::new(pool.clone())),
            deliveries: Arc::new(deliveries::Repository::new(pool)),
        }
    }

    /// Creates tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        schema::migrate(&self.endpoints.pool()).await
    }
}

#[async_trait]
impl Store for Storage {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.endpoints.create(endpoint).await
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<Endpoint>> {
        self.endpoints.find_by_id(id).await
    }

    async fn list_endpoints(
        &self,
        owner: &OwnerId,
        filter: &EndpointFilter,
    ) -> Result<Vec<Endpoint>> {
        self.endpoints.find_by_owner(owner, filter).await
    }

    async fn list_all_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.endpoints.find_all().await
    }

    async fn update_endpoint(
        &self,
        id: EndpointId,
        patch: &EndpointPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Endpoint>> {
        self.endpoints.update(id, patch, now).await
    }

    async fn delete_endpoint(&self, id: EndpointId) -> Result<bool> {
        self.endpoints.delete(id).await
    }

    async fn subscribers_for(&self, event_type: EventType) -> Result<Vec<Endpoint>> {
        self.endpoints.find_subscribers(event_type).await
    }

    async fn create_delivery(&self, delivery: &Delivery) -> Result<()> {
        self.deliveries.create(delivery).await
    }

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<Delivery>> {
        self.deliveries.find_by_id(id).await
    }

    async fn list_deliveries(&self, filter: &DeliveryFilter, page: Page) -> Result<Vec<Delivery>> {
        self.deliveries.find(filter, page).await
    }

    async fn claim_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<Delivery>> {
        self.deliveries.claim_due(now, limit, lease_until).await
    }

    async fn begin_attempt(
        &self,
        claim: &Claim,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<Delivery>> {
        self.deliveries.begin_attempt(claim, now, lease_until).await
    }

    async fn record_attempt(
        &self,
        id: DeliveryId,
        outcome: &AttemptOutcome,
    ) -> Result<Option<Delivery>> {
        self.deliveries.record_attempt(id, outcome).await
    }

    async fn fail_delivery(
        &self,
        id: DeliveryId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.deliveries.mark_failed(id, reason, now).await
    }

    async fn fail_pending_for_endpoint(
        &self,
        endpoint_id: EndpointId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        self.deliveries.fail_pending_for_endpoint(endpoint_id, reason, now).await
    }

    async fn requeue_failed(&self, id: DeliveryId, now: DateTime<Utc>) -> Result<Option<Delivery>> {
        self.deliveries.requeue_failed(id, now).await
    }

    async fn reschedule_delivery(
        &self,
        id: DeliveryId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.deliveries.reschedule(id, next_retry_at).await
    }

    async fn release_deliveries(
        &self,
        claims: &[Claim],
        next_retry_at: DateTime<Utc>,
    ) -> Result<u64> {
        self.deliveries.release(claims, next_retry_at).await
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.deliveries.purge_older_than(cutoff).await
    }

    async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.endpoints.pool()).await?;

        Ok(())
    }
}
