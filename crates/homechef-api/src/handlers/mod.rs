//! HTTP request handlers.

pub mod deliveries;
pub mod events;
pub mod health;
pub mod webhooks;

pub use deliveries::{get_delivery, list_deliveries, retry_delivery};
pub use events::{enqueue_event, list_event_types};
pub use health::{health_check, liveness_check, readiness_check};
pub use webhooks::{
    create_endpoint, delete_endpoint, get_endpoint, list_endpoints, test_endpoint, update_endpoint,
};
