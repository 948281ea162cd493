//! Core domain models, signing, and persistence for webhook delivery.
//!
//! Provides strongly-typed identifiers, the closed event catalog, endpoint and
//! delivery records, the HMAC signer, clock abstractions, and the `Store`
//! contract with PostgreSQL and in-memory implementations. The delivery engine
//! and the management API both build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod signing;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    Claim, Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, EndpointPatch, EventId,
    EventType, OwnerId,
};
pub use storage::{memory::MemoryStore, Storage, Store};
pub use time::{Clock, RealClock, TestClock};
