//! In-memory index of active subscriptions keyed by event type.
//!
//! The registry is a cache in front of `Store::subscribers_for`. It is
//! rebuilt from the store on startup, updated after every successful endpoint
//! write, and periodically reconciled against the store to heal drift. Until
//! the first rebuild succeeds every lookup goes to the store.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use homechef_core::{CoreError, Endpoint, EndpointId, EventType, Store};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Store snapshots are retried this many times when writes keep racing them.
const SNAPSHOT_ATTEMPTS: usize = 3;

#[derive(Default)]
struct Index {
    loaded: bool,
    /// Bumped by every `upsert` and `remove`; a snapshot read under an older
    /// generation may predate those writes and is discarded.
    generation: u64,
    endpoints: HashMap<EndpointId, Endpoint>,
    by_type: HashMap<EventType, BTreeSet<EndpointId>>,
}

impl Index {
    fn insert(&mut self, endpoint: Endpoint) {
        self.remove(endpoint.id);
        if !endpoint.is_active {
            return;
        }
        for event_type in &endpoint.events {
            self.by_type.entry(*event_type).or_default().insert(endpoint.id);
        }
        self.endpoints.insert(endpoint.id, endpoint);
    }

    fn remove(&mut self, id: EndpointId) -> bool {
        let Some(previous) = self.endpoints.remove(&id) else {
            return false;
        };
        for event_type in &previous.events {
            if let Some(ids) = self.by_type.get_mut(event_type) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_type.remove(event_type);
                }
            }
        }
        true
    }

    fn from_endpoints(generation: u64, endpoints: Vec<Endpoint>) -> Self {
        let mut index = Self { loaded: true, generation, ..Self::default() };
        for endpoint in endpoints {
            index.insert(endpoint);
        }
        index
    }

    /// Entries that differ between `self` and `fresh`.
    fn drift_from(&self, fresh: &Self) -> usize {
        let changed = fresh
            .endpoints
            .iter()
            .filter(|(id, endpoint)| {
                self.endpoints.get(id).is_none_or(|cached| {
                    cached.events != endpoint.events || cached.updated_at != endpoint.updated_at
                })
            })
            .count();
        let gone = self.endpoints.keys().filter(|id| !fresh.endpoints.contains_key(id)).count();
        changed + gone
    }
}

/// Cache of active endpoints by subscribed event type.
pub struct SubscriptionRegistry {
    store: Arc<dyn Store>,
    index: RwLock<Index>,
}

impl SubscriptionRegistry {
    /// Creates an empty, unloaded registry.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, index: RwLock::new(Index::default()) }
    }

    /// Replaces the index with the store's current endpoints.
    ///
    /// Returns the number of active endpoints indexed.
    ///
    /// # Errors
    ///
    /// Returns the store error; the previous index is kept.
    pub async fn rebuild(&self) -> Result<usize, CoreError> {
        self.sync().await?;
        let count = self.len().await;
        debug!(active_endpoints = count, "subscription registry rebuilt");
        Ok(count)
    }

    /// Full sync against the store, logging how many entries had drifted.
    ///
    /// # Errors
    ///
    /// Returns the store error; the previous index is kept.
    pub async fn reconcile(&self) -> Result<usize, CoreError> {
        let drifted = self.sync().await?;
        if drifted > 0 {
            warn!(drifted, "subscription registry drift healed");
        }
        Ok(drifted)
    }

    /// Loads a snapshot and swaps it in unless an `upsert` or `remove` ran
    /// meanwhile, retrying a few times. Returns the drift healed.
    async fn sync(&self) -> Result<usize, CoreError> {
        for _ in 0..SNAPSHOT_ATTEMPTS {
            let (generation, endpoints) = self.snapshot().await?;
            if let Some(drifted) = self.apply_snapshot(generation, endpoints).await {
                return Ok(drifted);
            }
            debug!("endpoint written during registry sync, reloading");
        }

        debug!(attempts = SNAPSHOT_ATTEMPTS, "registry sync kept racing writes, skipped");
        Ok(0)
    }

    async fn snapshot(&self) -> Result<(u64, Vec<Endpoint>), CoreError> {
        let generation = self.index.read().await.generation;
        let endpoints = self.store.list_all_endpoints().await?;
        Ok((generation, endpoints))
    }

    /// Installs a snapshot taken at `generation`. Returns `None` if the index
    /// has been written since.
    async fn apply_snapshot(&self, generation: u64, endpoints: Vec<Endpoint>) -> Option<usize> {
        let fresh = Index::from_endpoints(generation, endpoints);

        let mut index = self.index.write().await;
        if index.generation != generation {
            return None;
        }
        let drifted = if index.loaded { index.drift_from(&fresh) } else { 0 };
        *index = fresh;
        Some(drifted)
    }

    /// Active endpoints subscribed to `event_type`.
    ///
    /// # Errors
    ///
    /// Returns a store error only when the registry has never been loaded.
    pub async fn subscribers_for(&self, event_type: EventType) -> Result<Vec<Endpoint>, CoreError> {
        {
            let index = self.index.read().await;
            if index.loaded {
                return Ok(index
                    .by_type
                    .get(&event_type)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| index.endpoints.get(id).cloned())
                    .collect());
            }
        }

        debug!(%event_type, "subscription registry not loaded, querying store");
        self.store.subscribers_for(event_type).await
    }

    /// Records a created or updated endpoint. Paused endpoints are dropped.
    pub async fn upsert(&self, endpoint: Endpoint) {
        let mut index = self.index.write().await;
        index.generation += 1;
        index.insert(endpoint);
    }

    /// Forgets a deleted endpoint.
    pub async fn remove(&self, id: EndpointId) {
        let mut index = self.index.write().await;
        index.generation += 1;
        index.remove(id);
    }

    /// Number of active endpoints indexed.
    pub async fn len(&self) -> usize {
        self.index.read().await.endpoints.len()
    }

    /// Whether no active endpoints are indexed.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Reconciles every `period` until cancelled.
    pub async fn run_reconciler(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        info!(interval_seconds = period.as_secs(), "registry reconciler starting");

        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.reconcile().await {
                        warn!(error = %error, "registry reconcile failed");
                    }
                }
            }
        }

        info!("registry reconciler stopped");
    }
}
