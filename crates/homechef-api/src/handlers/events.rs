//! Event catalog and producer-facing enqueue handlers.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    Json,
};
use homechef_core::{DeliveryId, EventType};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// One subscribable event type.
#[derive(Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Wire name, e.g. `order.created`.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Short description.
    pub description: String,
}

/// Response of `GET /webhooks/events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Catalog {
    /// Every subscribable event type.
    pub events: Vec<CatalogEntry>,
}

/// Response of `POST /internal/v1/events/{event_type}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnqueueResponse {
    /// One id per subscribed endpoint; empty when nobody subscribes.
    pub delivery_ids: Vec<Uuid>,
}

/// Lists the event catalog.
pub async fn list_event_types(State(state): State<AppState>) -> Json<Catalog> {
    let events = state
        .ingress
        .catalog()
        .iter()
        .map(|&event_type| CatalogEntry {
            event_type,
            description: event_type.description().to_string(),
        })
        .collect();

    Json(Catalog { events })
}

/// Accepts a domain event from an internal producer and fans it out.
///
/// The raw body is stored and signed byte for byte.
///
/// Bodies cut off by the transport limit answer the same JSON 413 as
/// payloads ingress measures itself.
#[instrument(name = "enqueue_event", skip_all, fields(size = tracing::field::Empty))]
pub async fn enqueue_event(
    State(state): State<AppState>,
    event_type: Result<Path<String>, PathRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let Path(event_type) = event_type?;
    let body = body.map_err(|rejection| {
        ApiError::from_body_rejection(&rejection, state.max_payload_size)
    })?;
    tracing::Span::current().record("size", body.len());
    let ids = state.ingress.enqueue(&event_type, body).await?;

    let delivery_ids = ids.into_iter().map(|DeliveryId(id)| id).collect();
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { delivery_ids })))
}
