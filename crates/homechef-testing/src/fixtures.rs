//! Test data builders.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::Utc;
use homechef_core::{Endpoint, EndpointId, EventType, OwnerId};
use homechef_delivery::NewEndpoint;

use crate::DEFAULT_OWNER;

/// JSON payload `{"id": "<id>"}` as raw bytes.
pub fn json_payload(id: &str) -> Bytes {
    Bytes::from(serde_json::json!({ "id": id }).to_string())
}

/// Builder for endpoints, either as a stored row or as a create request.
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    owner: OwnerId,
    url: String,
    description: Option<String>,
    events: Vec<EventType>,
    secret: String,
    is_active: bool,
    max_concurrency: Option<i32>,
    custom_headers: BTreeMap<String, String>,
}

impl EndpointBuilder {
    /// Active endpoint subscribed to `order.created` at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            owner: OwnerId::new(DEFAULT_OWNER),
            url: url.into(),
            description: None,
            events: vec![EventType::OrderCreated],
            secret: "5ec2e7".repeat(10) + "abcd",
            is_active: true,
            max_concurrency: None,
            custom_headers: BTreeMap::new(),
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = OwnerId::new(owner);
        self
    }

    /// Replaces the subscribed event types.
    #[must_use]
    pub fn events(mut self, events: &[EventType]) -> Self {
        self.events = events.to_vec();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the signing secret used by `build`.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Creates the endpoint paused.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Sets a per-endpoint concurrency cap.
    #[must_use]
    pub fn max_concurrency(mut self, cap: i32) -> Self {
        self.max_concurrency = Some(cap);
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    /// Endpoint row for direct store insertion.
    pub fn build(self) -> Endpoint {
        let now = Utc::now();
        Endpoint {
            id: EndpointId::new(),
            owner_id: self.owner,
            url: self.url,
            description: self.description,
            events: self.events,
            secret: self.secret,
            is_active: self.is_active,
            max_concurrency: self.max_concurrency,
            custom_headers: sqlx::types::Json(self.custom_headers),
            created_at: now,
            updated_at: now,
        }
    }

    /// Create request for `Ingress::create_endpoint`. The secret is generated
    /// by the engine.
    pub fn into_new(self) -> NewEndpoint {
        NewEndpoint {
            url: self.url,
            description: self.description,
            events: self.events.iter().map(|e| e.as_str().to_string()).collect(),
            custom_headers: self.custom_headers,
            max_concurrency: self.max_concurrency,
            is_active: Some(self.is_active),
        }
    }
}
