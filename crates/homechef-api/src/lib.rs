//! HomeChef webhooks HTTP API.
//!
//! Exposes the bearer-authenticated management surface under
//! `/api/v1/webhooks`, the internal producer route that feeds events into the
//! delivery engine, and unauthenticated health checks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use homechef_core::{Clock, Store};
use homechef_delivery::{DeliveryEngine, Ingress};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ErrorBody};
pub use middleware::auth::{StaticTokenVerifier, TokenVerifier};
pub use server::{create_router, shutdown_signal, start_server};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Enqueue and management operations.
    pub ingress: Arc<Ingress>,
    /// Store, for health checks.
    pub store: Arc<dyn Store>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Owner token verifier for the management routes.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Producer credential verifier for the internal event route.
    pub producer_verifier: Arc<dyn TokenVerifier>,
    /// Largest accepted event payload in bytes.
    pub max_payload_size: usize,
}

impl AppState {
    /// Builds state over a constructed engine.
    ///
    /// Owner tokens never authenticate the producer route and producer
    /// tokens never authenticate the management routes.
    pub fn new(
        engine: &DeliveryEngine,
        verifier: Arc<dyn TokenVerifier>,
        producer_verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            ingress: engine.ingress(),
            store: engine.store(),
            clock: engine.clock(),
            verifier,
            producer_verifier,
            max_payload_size: engine.config().max_payload_size,
        }
    }
}
