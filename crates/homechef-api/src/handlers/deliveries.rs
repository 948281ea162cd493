//! Delivery query and manual retry handlers.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use chrono::{DateTime, Utc};
use homechef_core::{
    models::{DeliveryFilter, Page},
    Delivery, DeliveryId, DeliveryStatus, EndpointId, EventType, OwnerId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Query of `GET /webhooks/deliveries`.
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryQuery {
    /// Restrict to one endpoint.
    pub endpoint_id: Option<Uuid>,
    /// Restrict to one status.
    pub status: Option<DeliveryStatus>,
    /// Restrict to one event type.
    pub event_type: Option<EventType>,
    /// Created at or after.
    pub since: Option<DateTime<Utc>>,
    /// Created before.
    pub until: Option<DateTime<Utc>>,
    /// Page size, default 50, max 500.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: Option<u32>,
}

/// Delivery as returned by the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryResponse {
    /// Delivery id, also sent as `X-HomeChef-Delivery`.
    pub id: Uuid,
    /// Target endpoint.
    pub endpoint_id: Uuid,
    /// Event this delivery fans out from.
    pub event_id: Uuid,
    /// Event type.
    pub event_type: EventType,
    /// Payload, as JSON when it parses and as text otherwise.
    pub payload: Value,
    /// Lifecycle state.
    pub status: DeliveryStatus,
    /// Attempts made.
    pub attempt_count: i32,
    /// Last HTTP status.
    pub response_status: Option<i32>,
    /// Last response body, truncated.
    pub response_body: Option<String>,
    /// Last failure description.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First attempt start.
    pub first_attempted_at: Option<DateTime<Utc>>,
    /// Last attempt start.
    pub last_attempted_at: Option<DateTime<Utc>>,
    /// Next attempt, while pending.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Terminal failure time.
    pub failed_at: Option<DateTime<Utc>>,
    /// Terminal success time.
    pub succeeded_at: Option<DateTime<Utc>>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        let payload = serde_json::from_slice(&delivery.payload).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&delivery.payload).into_owned())
        });

        Self {
            id: delivery.id.0,
            endpoint_id: delivery.endpoint_id.0,
            event_id: delivery.event_id.0,
            event_type: delivery.event_type,
            payload,
            status: delivery.status,
            attempt_count: delivery.attempt_count,
            response_status: delivery.response_status,
            response_body: delivery.response_body,
            last_error: delivery.last_error,
            created_at: delivery.created_at,
            first_attempted_at: delivery.first_attempted_at,
            last_attempted_at: delivery.last_attempted_at,
            next_retry_at: delivery.next_retry_at,
            failed_at: delivery.failed_at,
            succeeded_at: delivery.succeeded_at,
        }
    }
}

/// Response of `GET /webhooks/deliveries`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryList {
    /// Deliveries, newest first.
    pub deliveries: Vec<DeliveryResponse>,
    /// Effective page size.
    pub limit: u32,
    /// Rows skipped.
    pub offset: u32,
}

/// Queries deliveries to the caller's endpoints.
#[instrument(name = "list_deliveries", skip(state, query), fields(owner = %owner))]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    query: Result<Query<DeliveryQuery>, QueryRejection>,
) -> Result<Json<DeliveryList>, ApiError> {
    let Query(query) = query?;
    let filter = DeliveryFilter {
        owner_id: None,
        endpoint_id: query.endpoint_id.map(EndpointId),
        status: query.status,
        event_type: query.event_type,
        since: query.since,
        until: query.until,
    };
    let page = Page::new(query.limit, query.offset);

    let deliveries = state.ingress.list_deliveries(&owner, filter, page).await?;
    Ok(Json(DeliveryList {
        deliveries: deliveries.into_iter().map(DeliveryResponse::from).collect(),
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Fetches one delivery.
#[instrument(name = "get_delivery", skip(state, id), fields(owner = %owner))]
pub async fn get_delivery(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let Path(id) = id?;
    let delivery = state.ingress.get_delivery(&owner, DeliveryId(id)).await?;
    Ok(Json(delivery.into()))
}

/// Requeues a failed delivery.
#[instrument(name = "retry_delivery", skip(state, id), fields(owner = %owner))]
pub async fn retry_delivery(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DeliveryResponse>, ApiError> {
    let Path(id) = id?;
    let delivery = state.ingress.manual_retry(&owner, DeliveryId(id)).await?;
    Ok(Json(delivery.into()))
}
