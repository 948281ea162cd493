//! Test infrastructure for the HomeChef webhook engine.
//!
//! `TestEnv` bundles an in-memory store, a controllable clock, a wiremock
//! server playing the subscriber, and a running `DeliveryEngine`. Tests drive
//! the engine through its public ingress surface and assert on persisted
//! deliveries and on the requests the subscriber received.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use homechef_core::{MemoryStore, OwnerId, TestClock};
use homechef_delivery::DeliveryEngine;

pub mod database;
pub mod fixtures;
pub mod http;

mod delivery;
mod env_core;

pub use database::TestDatabase;
pub use delivery::DEFAULT_WAIT;
pub use env_core::TestEnvBuilder;
pub use fixtures::{json_payload, EndpointBuilder};
pub use http::HOOK_PATH;

/// Owner principal used by environments unless a test picks another.
pub const DEFAULT_OWNER: &str = "chef-test";

/// Full engine environment without external services.
pub struct TestEnv {
    /// Subscriber mock. Endpoints created through the env point here.
    pub http_mock: wiremock::MockServer,
    /// Deterministic clock shared with the engine.
    pub clock: TestClock,
    store: Arc<MemoryStore>,
    engine: Option<DeliveryEngine>,
    owner: OwnerId,
}
