//! Concurrent worker pool that performs signed HTTP deliveries.
//!
//! Workers pull `DispatchJob`s from one bounded channel. Each job runs the
//! attempt procedure end to end:
//!
//! 1. `Store::begin_attempt` increments the attempt count, marks the delivery
//!    delivering and extends its lease
//! 2. the payload is signed and POSTed with the engine's deadline
//! 3. the response is classified and a retry time chosen via `RetryPolicy`
//! 4. the endpoint is re-read; a deleted or paused endpoint turns a pending
//!    retry into a terminal failure
//! 5. `Store::record_attempt` persists the outcome
//!
//! Every job carries the `Claim` it was issued under. `begin_attempt` only
//! applies while that claim is current, so a job that outlived its lease and
//! was re-claimed elsewhere sends nothing.
//!
//! A global semaphore caps requests in flight; endpoints with a concurrency
//! cap get their own semaphore on top. A worker never waits on a busy
//! endpoint: the job is released to pending, due after `busy_delay`, and the
//! worker moves on. The dispatcher never re-arms a delivery itself; it only
//! sets `next_retry_at` for the scheduler.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use homechef_core::{
    models::{AttemptOutcome, AttemptResolution},
    Claim, Clock, Delivery, DeliveryId, Endpoint, EndpointId, Store,
};
use tokio::{
    sync::{mpsc, Mutex, RwLock, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    engine::EngineStats,
    error::{DeliveryError, ErrorCategory, Result},
    retry::{RetryContext, RetryDecision, RetryPolicy},
};

/// Reason recorded when the endpoint was deleted before the attempt finished.
pub const ENDPOINT_DELETED: &str = "endpoint deleted";
/// Reason recorded when the endpoint was paused before the attempt finished.
pub const ENDPOINT_INACTIVE: &str = "endpoint inactive";

/// One unit of work for the pool.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    /// Endpoint snapshot at submission time.
    pub endpoint: Endpoint,
    /// Claim on the delivery to attempt.
    pub claim: Claim,
}

impl DispatchJob {
    /// Delivery this job attempts.
    pub fn delivery_id(&self) -> DeliveryId {
        self.claim.delivery_id
    }
}

/// Cloneable submission side of the dispatcher.
#[derive(Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchJob>,
    closing: CancellationToken,
}

impl DispatchQueue {
    /// Submits without waiting.
    ///
    /// # Errors
    ///
    /// `Backpressure` when the channel is full, `ShutdownRequested` once the
    /// dispatcher is closing.
    pub fn try_submit(&self, job: DispatchJob) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(DeliveryError::ShutdownRequested);
        }

        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::ShutdownRequested,
        })
    }

    /// Submits, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// `ShutdownRequested` if the dispatcher closes before capacity frees up.
    pub async fn submit(&self, job: DispatchJob) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(DeliveryError::ShutdownRequested);
        }

        tokio::select! {
            result = self.sender.send(job) => {
                result.map_err(|_| DeliveryError::ShutdownRequested)
            }
            () = self.closing.cancelled() => Err(DeliveryError::ShutdownRequested),
        }
    }

    /// Whether the dispatcher has stopped accepting work.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }
}

/// Settings for the worker pool.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Global cap on concurrent requests.
    pub max_in_flight: usize,
    /// Submission channel capacity.
    pub queue_size: usize,
    /// Lease taken on a delivery for the duration of an attempt.
    pub lease: Duration,
    /// How long a job for an endpoint at its concurrency cap is deferred.
    pub busy_delay: Duration,
    /// Backoff policy.
    pub retry_policy: RetryPolicy,
}

/// State shared by every worker.
struct Worker {
    store: Arc<dyn Store>,
    client: Arc<DeliveryClient>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    global_limit: Arc<Semaphore>,
    endpoint_limits: Mutex<HashMap<EndpointId, (usize, Arc<Semaphore>)>>,
    /// Claims of jobs taken off the queue that have not finished.
    held: Mutex<HashMap<DeliveryId, Claim>>,
    stopping: CancellationToken,
    stats: Arc<RwLock<EngineStats>>,
}

/// Worker pool that owns the submission channel.
pub struct Dispatcher {
    queue: DispatchQueue,
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    worker: Arc<Worker>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

/// What the dispatcher left behind when it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Claims of jobs still queued when workers stopped.
    pub queued: Vec<Claim>,
    /// Claims of jobs taken by a worker that had not finished, either still
    /// waiting for a permit or mid-attempt when the grace period ran out.
    pub in_flight: Vec<Claim>,
    /// Whether every worker finished within the grace period.
    pub graceful: bool,
}

impl Dispatcher {
    /// Creates an idle pool. Call `spawn_workers` to start processing.
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<DeliveryClient>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
        stats: Arc<RwLock<EngineStats>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        let queue = DispatchQueue { sender, closing: CancellationToken::new() };
        let cancellation_token = CancellationToken::new();
        let worker = Arc::new(Worker {
            store,
            client,
            clock,
            global_limit: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            config,
            endpoint_limits: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            stopping: cancellation_token.clone(),
            stats,
        });

        Self {
            queue,
            receiver: Arc::new(Mutex::new(receiver)),
            worker,
            cancellation_token,
            worker_handles: Vec::new(),
        }
    }

    /// Submission handle.
    pub fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Runs one job on the caller's task, outside the pool.
    pub async fn execute(&self, job: DispatchJob) {
        self.worker.run_job(job).await;
    }

    /// Spawns the configured number of workers.
    pub async fn spawn_workers(&mut self) {
        let worker_count = self.worker.config.workers;
        info!(worker_count, "spawning delivery workers");

        self.worker.stats.write().await.active_workers = worker_count;

        for worker_id in 0..worker_count {
            let worker = self.worker.clone();
            let receiver = self.receiver.clone();
            let cancel = self.cancellation_token.clone();

            let handle = tokio::spawn(async move {
                debug!(worker_id, "delivery worker starting");

                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => None,
                            job = receiver.recv() => job,
                        }
                    };

                    let Some(job) = job else { break };
                    worker.run_job(job).await;
                }

                debug!(worker_id, "delivery worker stopped");
            });

            self.worker_handles.push(handle);
        }
    }

    /// Stops the pool.
    ///
    /// Refuses new submissions, lets running attempts finish within `grace`,
    /// then aborts stragglers and reports what was left queued or unfinished
    /// so the caller can release those deliveries.
    pub async fn shutdown_graceful(mut self, grace: Duration) -> DrainReport {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = grace.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.queue.closing.cancel();
        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let graceful =
            match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
                Ok(results) => {
                    let panicked = results.iter().filter(|r| r.is_err()).count();
                    if panicked > 0 {
                        error!(panicked, "delivery workers panicked during shutdown");
                    }
                    true
                },
                Err(_timeout) => {
                    error!(
                        timeout_seconds = grace.as_secs(),
                        "worker shutdown timed out, aborting remaining attempts"
                    );
                    for abort in aborts {
                        abort.abort();
                    }
                    false
                },
            };

        let mut queued = Vec::new();
        {
            let mut receiver = self.receiver.lock().await;
            receiver.close();
            while let Ok(job) = receiver.try_recv() {
                queued.push(job.claim);
            }
        }

        let in_flight: Vec<Claim> =
            self.worker.held.lock().await.drain().map(|(_, claim)| claim).collect();
        self.worker.stats.write().await.active_workers = 0;

        DrainReport { queued, in_flight, graceful }
    }
}

impl Worker {
    async fn run_job(&self, job: DispatchJob) {
        let delivery_id = job.delivery_id();
        self.held.lock().await.insert(delivery_id, job.claim);

        let endpoint_permit = match self.endpoint_limit(&job.endpoint).await {
            Some(semaphore) => match semaphore.try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.defer_busy(&job).await;
                    self.held.lock().await.remove(&delivery_id);
                    return;
                },
            },
            None => None,
        };

        // A job still waiting here at shutdown stays held and is released by
        // the drain.
        let global_permit = tokio::select! {
            biased;
            () = self.stopping.cancelled() => None,
            permit = self.global_limit.clone().acquire_owned() => permit.ok(),
        };
        let Some(_global_permit) = global_permit else {
            debug!(%delivery_id, "dispatcher stopping before the attempt started");
            return;
        };

        self.stats.write().await.in_flight_deliveries += 1;

        if let Err(error) = self.attempt(job).await {
            error!(
                %delivery_id,
                error = %error,
                "delivery attempt could not be persisted; lease expiry will recover it"
            );
        }

        self.stats.write().await.in_flight_deliveries -= 1;
        self.held.lock().await.remove(&delivery_id);
        drop(endpoint_permit);
    }

    /// Hands a job for an endpoint at its cap back to the scheduler.
    async fn defer_busy(&self, job: &DispatchJob) {
        let delivery_id = job.delivery_id();
        let due = self.clock.now_utc() + lease_duration(self.config.busy_delay);

        match self.store.release_deliveries(&[job.claim], due).await {
            Ok(released) => {
                if released > 0 {
                    self.stats.write().await.deferred_deliveries += 1;
                }
                debug!(
                    %delivery_id,
                    endpoint_id = %job.endpoint.id,
                    next_retry_at = %due,
                    "endpoint at its concurrency cap, delivery deferred"
                );
            },
            Err(error) => {
                warn!(
                    %delivery_id,
                    error = %error,
                    "failed to defer delivery; lease expiry will recover it"
                );
            },
        }
    }

    /// Per-endpoint semaphore, recreated when the cap changes.
    async fn endpoint_limit(&self, endpoint: &Endpoint) -> Option<Arc<Semaphore>> {
        let mut limits = self.endpoint_limits.lock().await;
        let Some(cap) = endpoint.concurrency_cap() else {
            limits.remove(&endpoint.id);
            return None;
        };

        let entry = limits
            .entry(endpoint.id)
            .or_insert_with(|| (cap, Arc::new(Semaphore::new(cap))));
        if entry.0 != cap {
            *entry = (cap, Arc::new(Semaphore::new(cap)));
        }
        Some(entry.1.clone())
    }

    async fn attempt(&self, job: DispatchJob) -> Result<()> {
        let DispatchJob { endpoint, claim } = job;
        let delivery_id = claim.delivery_id;

        let now = self.clock.now_utc();
        let lease_until = now + lease_duration(self.config.lease);
        let Some(delivery) = self.store.begin_attempt(&claim, now, lease_until).await? else {
            debug!(%delivery_id, "claim superseded or delivery terminal, skipping");
            return Ok(());
        };
        self.held.lock().await.insert(delivery_id, Claim { delivery_id, lease: lease_until });
        self.stats.write().await.attempts_made += 1;

        let attempt = delivery.attempt_count;
        let result = self.send(&endpoint, &delivery).await;
        let completed_at = self.clock.now_utc();

        let mut outcome = self.classify(attempt, result, completed_at);
        self.apply_endpoint_state(&endpoint, &mut outcome).await;

        let resolution = outcome.resolution;
        match self.store.record_attempt(delivery_id, &outcome).await? {
            Some(_) => self.count(resolution).await,
            None => {
                warn!(%delivery_id, attempt, "attempt outcome was stale and has been discarded");
                return Ok(());
            },
        }

        match resolution {
            AttemptResolution::Succeeded => {
                info!(%delivery_id, endpoint_id = %endpoint.id, attempt, "delivery succeeded");
            },
            AttemptResolution::RetryAt(at) => {
                info!(
                    %delivery_id,
                    endpoint_id = %endpoint.id,
                    attempt,
                    next_retry_at = %at,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "delivery failed, retry scheduled"
                );
            },
            AttemptResolution::Failed => {
                warn!(
                    %delivery_id,
                    endpoint_id = %endpoint.id,
                    attempt,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "delivery failed permanently"
                );
            },
        }

        Ok(())
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        delivery: &Delivery,
    ) -> Result<crate::client::DeliveryResponse> {
        let request = DeliveryRequest::signed(
            delivery.id,
            delivery.event_type.as_str(),
            endpoint.url.as_str(),
            Bytes::from(delivery.payload.clone()),
            &endpoint.secret,
            endpoint.custom_headers().clone(),
            delivery.attempt_count,
        )?;

        self.client.deliver(request).await?.into_result()
    }

    fn classify(
        &self,
        attempt: i32,
        result: Result<crate::client::DeliveryResponse>,
        completed_at: DateTime<Utc>,
    ) -> AttemptOutcome {
        match result {
            Ok(response) => AttemptOutcome {
                attempt,
                resolution: AttemptResolution::Succeeded,
                response_status: Some(i32::from(response.status_code)),
                response_body: Some(response.body),
                error: None,
                completed_at,
            },
            Err(error) => {
                debug!(
                    attempt,
                    category = %ErrorCategory::from(&error),
                    retryable = error.is_retryable(),
                    "classifying failed attempt"
                );

                let context = RetryContext::new(
                    u32::try_from(attempt).unwrap_or(0),
                    error.clone(),
                    completed_at,
                    self.config.retry_policy.clone(),
                );
                let (resolution, message) = match context.decide_retry() {
                    RetryDecision::Retry { next_attempt_at } => {
                        (AttemptResolution::RetryAt(next_attempt_at), error.to_string())
                    },
                    RetryDecision::GiveUp { reason } => (AttemptResolution::Failed, reason),
                };

                AttemptOutcome {
                    attempt,
                    resolution,
                    response_status: error.status_code().map(i32::from),
                    response_body: error.body().map(str::to_string),
                    error: Some(message),
                    completed_at,
                }
            },
        }
    }

    /// An endpoint deleted or paused while the attempt ran turns the outcome
    /// into a terminal failure. The response fields are kept.
    async fn apply_endpoint_state(&self, endpoint: &Endpoint, outcome: &mut AttemptOutcome) {
        if outcome.resolution == AttemptResolution::Failed {
            return;
        }

        let reason = match self.store.get_endpoint(endpoint.id).await {
            Ok(Some(current)) if current.is_active => return,
            Ok(Some(_)) => ENDPOINT_INACTIVE,
            Ok(None) => ENDPOINT_DELETED,
            Err(error) => {
                warn!(endpoint_id = %endpoint.id, error = %error, "endpoint re-check failed");
                return;
            },
        };

        outcome.resolution = AttemptResolution::Failed;
        outcome.error = Some(match outcome.error.take() {
            Some(previous) => format!("{reason}: {previous}"),
            None => reason.to_string(),
        });
    }

    async fn count(&self, resolution: AttemptResolution) {
        let mut stats = self.stats.write().await;
        match resolution {
            AttemptResolution::Succeeded => stats.successful_deliveries += 1,
            AttemptResolution::RetryAt(_) => stats.retries_scheduled += 1,
            AttemptResolution::Failed => stats.permanent_failures += 1,
        }
    }
}

/// Converts a lease length for timestamp arithmetic, saturating at one day.
pub(crate) fn lease_duration(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(1))
}
