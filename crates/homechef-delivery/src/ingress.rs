//! Public entry points: producer `enqueue` and the management operations.
//!
//! Every management call is scoped to the authenticated owner; entities that
//! belong to someone else are reported as not found. Store writes always
//! happen before the registry is updated.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use homechef_core::{
    models::{DeliveryFilter, EndpointFilter, Page, PING_EVENT},
    signing, Claim, Clock, Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId,
    EndpointPatch, EventId, EventType, OwnerId, Store,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    dispatcher::{lease_duration, DispatchJob, DispatchQueue, ENDPOINT_DELETED},
    error::{DeliveryError, IngressError},
    validation,
};

/// Fixed body of the synthetic test delivery.
pub const PING_PAYLOAD: &[u8] =
    br#"{"type":"ping","message":"This is a test webhook from HomeChef"}"#;

/// Settings for ingress.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// Largest accepted payload in bytes.
    pub max_payload_size: usize,
    /// Reservation placed on fresh deliveries while the dispatcher owns them.
    pub lease: Duration,
    /// Delay applied to a fresh delivery when the dispatch queue is full.
    pub backpressure_delay: Duration,
}

/// Fields for a new endpoint.
#[derive(Debug, Clone, Default)]
pub struct NewEndpoint {
    /// Target URL.
    pub url: String,
    /// Optional label.
    pub description: Option<String>,
    /// Event type wire names.
    pub events: Vec<String>,
    /// Extra request headers.
    pub custom_headers: BTreeMap<String, String>,
    /// Optional per-endpoint concurrency cap.
    pub max_concurrency: Option<i32>,
    /// Start paused when false. Defaults to active.
    pub is_active: Option<bool>,
}

/// Fields for an endpoint update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EndpointUpdate {
    /// New target URL.
    pub url: Option<String>,
    /// New label; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// Replacement event type wire names.
    pub events: Option<Vec<String>>,
    /// Pause or resume.
    pub is_active: Option<bool>,
    /// Replacement custom header map.
    pub custom_headers: Option<BTreeMap<String, String>>,
    /// New cap; `Some(None)` removes it.
    pub max_concurrency: Option<Option<i32>>,
}

/// Outcome of a synthetic ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDeliveryResult {
    /// Whether the subscriber answered 2xx.
    pub success: bool,
    /// HTTP status, when a response arrived.
    pub status_code: Option<u16>,
    /// Truncated response body, when a response arrived.
    pub response_body: Option<String>,
    /// Transport error or rejection reason.
    pub error: Option<String>,
    /// Round-trip time.
    pub duration_ms: u64,
}

/// Producer and management entry points.
pub struct Ingress {
    store: Arc<dyn Store>,
    registry: Arc<crate::registry::SubscriptionRegistry>,
    queue: DispatchQueue,
    client: Arc<DeliveryClient>,
    clock: Arc<dyn Clock>,
    config: IngressConfig,
    closing: CancellationToken,
}

impl Ingress {
    /// Creates the ingress surface.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<crate::registry::SubscriptionRegistry>,
        queue: DispatchQueue,
        client: Arc<DeliveryClient>,
        clock: Arc<dyn Clock>,
        config: IngressConfig,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            client,
            clock,
            config,
            closing: CancellationToken::new(),
        }
    }

    /// Stops accepting new events.
    pub fn close(&self) {
        self.closing.cancel();
    }

    /// Whether `enqueue` still accepts events.
    pub fn is_accepting(&self) -> bool {
        !self.closing.is_cancelled()
    }

    /// Fans an event out to every active subscriber.
    ///
    /// Each delivery is persisted before it is handed to the dispatcher, with
    /// its due time reserved one lease ahead so the scheduler leaves it alone
    /// unless this process dies. Returns the created delivery ids, possibly
    /// empty.
    ///
    /// If the store fails partway through the fan-out, the deliveries already
    /// persisted are still dispatched before the error is returned; a retried
    /// publish may therefore reach those subscribers twice.
    ///
    /// # Errors
    ///
    /// `UnknownEventType`, `PayloadTooLarge`, `StoreUnavailable`, or
    /// `ShuttingDown`.
    pub async fn enqueue(
        &self,
        event_type: &str,
        payload: Bytes,
    ) -> Result<Vec<DeliveryId>, IngressError> {
        if !self.is_accepting() {
            return Err(IngressError::ShuttingDown);
        }

        let event_type: EventType = event_type.parse()?;
        if payload.len() > self.config.max_payload_size {
            return Err(IngressError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let subscribers = self.registry.subscribers_for(event_type).await?;
        let event_id = EventId::new();
        if subscribers.is_empty() {
            debug!(%event_id, %event_type, "no subscribers for event");
            return Ok(Vec::new());
        }

        let now = self.clock.now_utc();
        let reserved_until = now + lease_duration(self.config.lease);
        let subscriber_count = subscribers.len();

        let mut jobs = Vec::with_capacity(subscriber_count);
        let mut failure = None;
        for endpoint in subscribers {
            let delivery = Delivery::new(
                endpoint.id,
                event_id,
                event_type,
                payload.to_vec(),
                now,
                reserved_until,
            );
            if let Err(error) = self.store.create_delivery(&delivery).await {
                failure = Some(error);
                break;
            }
            let claim = Claim { delivery_id: delivery.id, lease: reserved_until };
            jobs.push(DispatchJob { endpoint, claim });
        }

        let ids: Vec<DeliveryId> = jobs.iter().map(DispatchJob::delivery_id).collect();
        self.dispatch_fresh(jobs, now).await;

        if let Some(error) = failure {
            warn!(
                %event_id,
                %event_type,
                created = ids.len(),
                subscribers = subscriber_count,
                error = %error,
                "fan-out interrupted; created deliveries were dispatched"
            );
            return Err(error.into());
        }

        info!(%event_id, %event_type, deliveries = ids.len(), "event enqueued");
        Ok(ids)
    }

    /// Hands freshly persisted deliveries to the dispatcher. A job the queue
    /// refuses is left for the scheduler.
    async fn dispatch_fresh(&self, jobs: Vec<DispatchJob>, now: DateTime<Utc>) {
        for job in jobs {
            let delivery_id = job.delivery_id();
            let retry_at = match self.queue.try_submit(job) {
                Ok(()) => continue,
                Err(DeliveryError::Backpressure) => {
                    warn!(%delivery_id, "dispatch queue full, deferring to scheduler");
                    now + lease_duration(self.config.backpressure_delay)
                },
                Err(_) => now,
            };
            if let Err(error) = self.store.reschedule_delivery(delivery_id, retry_at).await {
                warn!(%delivery_id, error = %error, "reschedule failed; reservation will expire");
            }
        }
    }

    /// Registers an endpoint and returns it, secret included.
    ///
    /// # Errors
    ///
    /// Validation errors, `SecretGeneration` when the RNG fails, or
    /// `StoreUnavailable`.
    pub async fn create_endpoint(
        &self,
        owner: &OwnerId,
        new: NewEndpoint,
    ) -> Result<Endpoint, IngressError> {
        validation::validate_url(&new.url)?;
        let events = validation::parse_event_types(&new.events)?;
        validation::validate_custom_headers(&new.custom_headers, self.client.signature_header())?;
        validate_concurrency(new.max_concurrency)?;

        let secret = signing::generate_secret()?;
        let now = self.clock.now_utc();
        let endpoint = Endpoint {
            id: EndpointId::new(),
            owner_id: owner.clone(),
            url: new.url,
            description: new.description,
            events,
            secret,
            is_active: new.is_active.unwrap_or(true),
            max_concurrency: new.max_concurrency,
            custom_headers: sqlx::types::Json(new.custom_headers),
            created_at: now,
            updated_at: now,
        };

        self.store.create_endpoint(&endpoint).await?;
        self.registry.upsert(endpoint.clone()).await;

        info!(endpoint_id = %endpoint.id, owner = %owner, "endpoint created");
        Ok(endpoint)
    }

    /// Fetches one of the owner's endpoints.
    ///
    /// # Errors
    ///
    /// `NotFound` or `StoreUnavailable`.
    pub async fn get_endpoint(
        &self,
        owner: &OwnerId,
        id: EndpointId,
    ) -> Result<Endpoint, IngressError> {
        match self.store.get_endpoint(id).await? {
            Some(endpoint) if &endpoint.owner_id == owner => Ok(endpoint),
            _ => Err(IngressError::NotFound(format!("endpoint {id}"))),
        }
    }

    /// Lists the owner's endpoints, newest first.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn list_endpoints(
        &self,
        owner: &OwnerId,
        filter: &EndpointFilter,
    ) -> Result<Vec<Endpoint>, IngressError> {
        Ok(self.store.list_endpoints(owner, filter).await?)
    }

    /// Applies an update to one of the owner's endpoints.
    ///
    /// # Errors
    ///
    /// Validation errors, `NotFound`, or `StoreUnavailable`.
    pub async fn update_endpoint(
        &self,
        owner: &OwnerId,
        id: EndpointId,
        update: EndpointUpdate,
    ) -> Result<Endpoint, IngressError> {
        if let Some(url) = &update.url {
            validation::validate_url(url)?;
        }
        let events = update.events.as_deref().map(validation::parse_event_types).transpose()?;
        if let Some(headers) = &update.custom_headers {
            validation::validate_custom_headers(headers, self.client.signature_header())?;
        }
        if let Some(cap) = update.max_concurrency {
            validate_concurrency(cap)?;
        }

        self.get_endpoint(owner, id).await?;

        let patch = EndpointPatch {
            url: update.url,
            description: update.description,
            events,
            is_active: update.is_active,
            custom_headers: update.custom_headers,
            max_concurrency: update.max_concurrency,
        };
        let now = self.clock.now_utc();
        let updated = self
            .store
            .update_endpoint(id, &patch, now)
            .await?
            .ok_or_else(|| IngressError::NotFound(format!("endpoint {id}")))?;
        self.registry.upsert(updated.clone()).await;

        info!(endpoint_id = %id, is_active = updated.is_active, "endpoint updated");
        Ok(updated)
    }

    /// Deletes one of the owner's endpoints and fails its pending deliveries.
    ///
    /// Deliveries mid-attempt are failed by the dispatcher when the attempt
    /// completes.
    ///
    /// # Errors
    ///
    /// `NotFound` or `StoreUnavailable`.
    pub async fn delete_endpoint(&self, owner: &OwnerId, id: EndpointId) -> Result<(), IngressError> {
        self.get_endpoint(owner, id).await?;

        if !self.store.delete_endpoint(id).await? {
            return Err(IngressError::NotFound(format!("endpoint {id}")));
        }
        self.registry.remove(id).await;

        let now = self.clock.now_utc();
        let failed = self.store.fail_pending_for_endpoint(id, ENDPOINT_DELETED, now).await?;
        info!(endpoint_id = %id, failed_pending = failed, "endpoint deleted");
        Ok(())
    }

    /// Sends one synthetic `ping` to the endpoint and reports the HTTP result.
    ///
    /// Nothing is persisted and nothing is retried.
    ///
    /// # Errors
    ///
    /// `NotFound` or `StoreUnavailable`. Delivery failures are reported in the
    /// result, not as errors.
    pub async fn test_webhook(
        &self,
        owner: &OwnerId,
        id: EndpointId,
    ) -> Result<TestDeliveryResult, IngressError> {
        let endpoint = self.get_endpoint(owner, id).await?;
        let started = std::time::Instant::now();

        let result = match DeliveryRequest::signed(
            DeliveryId::new(),
            PING_EVENT,
            endpoint.url.as_str(),
            Bytes::from_static(PING_PAYLOAD),
            &endpoint.secret,
            endpoint.custom_headers().clone(),
            1,
        ) {
            Ok(request) => self.client.deliver(request).await,
            Err(error) => Err(error),
        };
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match result {
            Ok(response) => TestDeliveryResult {
                success: response.is_success(),
                status_code: Some(response.status_code),
                error: (!response.is_success())
                    .then(|| format!("subscriber answered HTTP {}", response.status_code)),
                response_body: Some(response.body),
                duration_ms,
            },
            Err(error) => TestDeliveryResult {
                success: false,
                status_code: None,
                response_body: None,
                error: Some(error.to_string()),
                duration_ms,
            },
        };

        info!(endpoint_id = %id, success = result.success, "test webhook sent");
        Ok(result)
    }

    /// Queries deliveries to the owner's endpoints.
    ///
    /// # Errors
    ///
    /// `StoreUnavailable`.
    pub async fn list_deliveries(
        &self,
        owner: &OwnerId,
        filter: DeliveryFilter,
        page: Page,
    ) -> Result<Vec<Delivery>, IngressError> {
        let filter = DeliveryFilter { owner_id: Some(owner.clone()), ..filter };
        Ok(self.store.list_deliveries(&filter, page).await?)
    }

    /// Fetches one delivery to one of the owner's endpoints.
    ///
    /// # Errors
    ///
    /// `NotFound` or `StoreUnavailable`.
    pub async fn get_delivery(
        &self,
        owner: &OwnerId,
        id: DeliveryId,
    ) -> Result<Delivery, IngressError> {
        let not_found = || IngressError::NotFound(format!("delivery {id}"));

        let delivery = self.store.get_delivery(id).await?.ok_or_else(not_found)?;
        match self.store.get_endpoint(delivery.endpoint_id).await? {
            Some(endpoint) if &endpoint.owner_id == owner => Ok(delivery),
            _ => Err(not_found()),
        }
    }

    /// Requeues a failed delivery for one more round of attempts.
    ///
    /// The attempt count is kept; the delivery becomes due immediately and
    /// the scheduler picks it up on its next tick.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NotRetryable` unless the delivery is failed, or
    /// `StoreUnavailable`.
    pub async fn manual_retry(
        &self,
        owner: &OwnerId,
        id: DeliveryId,
    ) -> Result<Delivery, IngressError> {
        let delivery = self.get_delivery(owner, id).await?;
        if delivery.status != DeliveryStatus::Failed {
            return Err(IngressError::NotRetryable {
                id: id.to_string(),
                status: delivery.status.to_string(),
            });
        }

        let now = self.clock.now_utc();
        let requeued = self.store.requeue_failed(id, now).await?.ok_or_else(|| {
            IngressError::NotRetryable { id: id.to_string(), status: "no longer failed".into() }
        })?;

        info!(delivery_id = %id, attempt_count = requeued.attempt_count, "delivery requeued");
        Ok(requeued)
    }

    /// The subscribable event catalog.
    pub fn catalog(&self) -> &'static [EventType] {
        &EventType::ALL
    }
}

fn validate_concurrency(cap: Option<i32>) -> Result<(), IngressError> {
    match cap {
        Some(cap) if cap < 1 => {
            Err(IngressError::Validation("max_concurrency must be at least 1".to_string()))
        },
        _ => Ok(()),
    }
}
