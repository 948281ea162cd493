//! Outbound webhook delivery for HomeChef.
//!
//! Producers hand events to [`Ingress::enqueue`], which fans them out to every
//! active subscriber and persists one delivery per endpoint. The dispatcher
//! signs and POSTs each delivery; failures are rescheduled on an exponential
//! backoff and picked up again by the retry scheduler until they succeed or
//! exhaust their attempt budget.
//!
//! # Architecture
//!
//! 1. **Ingress** - validates, persists, and submits fresh deliveries
//! 2. **Dispatcher** - bounded worker pool performing signed HTTP attempts
//! 3. **Retry Scheduler** - claims due retries under a lease and resubmits them
//! 4. **Janitor** - prunes terminal deliveries past the retention horizon
//!
//! The store is the source of truth for every delivery. Leases on claimed and
//! fresh deliveries mean a crashed process never strands work and two
//! schedulers never dispatch the same delivery at once.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use homechef_core::{MemoryStore, RealClock};
//! use homechef_delivery::{DeliveryEngine, EngineConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let mut engine = DeliveryEngine::new(store, Arc::new(RealClock::new()), EngineConfig::default())?;
//! engine.start().await;
//!
//! let ids = engine.ingress().enqueue("order.created", Bytes::from_static(br#"{"id":"o1"}"#)).await?;
//! println!("created {} deliveries", ids.len());
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ingress;
pub mod janitor;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod validation;

pub use client::{ClientConfig, DeliveryClient};
pub use dispatcher::{DispatchJob, DispatchQueue, Dispatcher};
pub use engine::{DeliveryEngine, EngineConfig, EngineStats};
pub use error::{DeliveryError, IngressError, Result};
pub use ingress::{EndpointUpdate, Ingress, NewEndpoint, TestDeliveryResult};
pub use registry::SubscriptionRegistry;
pub use retry::RetryPolicy;
pub use scheduler::{RetryScheduler, TickReport};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 32;

/// Default capacity of the dispatch queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Default deliveries claimed per scheduler tick.
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Default largest accepted payload, 1 MiB.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
