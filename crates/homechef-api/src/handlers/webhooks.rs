//! Endpoint management handlers.

use std::collections::BTreeMap;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use homechef_core::{models::EndpointFilter, Endpoint, EndpointId, EventType, OwnerId};
use homechef_delivery::{EndpointUpdate, NewEndpoint, TestDeliveryResult};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Body of `POST /webhooks`.
#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    /// Target URL.
    pub url: String,
    /// Optional label.
    pub description: Option<String>,
    /// Event types to subscribe to.
    pub events: Vec<String>,
    /// Extra request headers.
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    /// Per-endpoint concurrency cap.
    pub max_concurrency: Option<i32>,
    /// Create paused when false.
    pub is_active: Option<bool>,
}

/// Body of `PUT /webhooks/{id}`. Absent fields are left unchanged; an
/// explicit `null` clears `description` and `max_concurrency`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEndpointRequest {
    /// New target URL.
    pub url: Option<String>,
    /// New label.
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    /// Replacement event types.
    pub events: Option<Vec<String>>,
    /// Pause or resume.
    pub is_active: Option<bool>,
    /// Replacement custom headers.
    pub custom_headers: Option<BTreeMap<String, String>>,
    /// New concurrency cap.
    #[serde(default, deserialize_with = "present")]
    pub max_concurrency: Option<Option<i32>>,
}

fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Query of `GET /webhooks`.
#[derive(Debug, Default, Deserialize)]
pub struct ListEndpointsQuery {
    /// Only active or only paused endpoints.
    pub active: Option<bool>,
    /// Only endpoints subscribed to this event type.
    pub event_type: Option<EventType>,
}

/// Endpoint as returned by the API. The secret is never included.
#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointResponse {
    /// Endpoint id.
    pub id: Uuid,
    /// Target URL.
    pub url: String,
    /// Optional label.
    pub description: Option<String>,
    /// Subscribed event types.
    pub events: Vec<EventType>,
    /// Whether deliveries are being sent.
    pub is_active: bool,
    /// Per-endpoint concurrency cap.
    pub max_concurrency: Option<i32>,
    /// Extra request headers.
    pub custom_headers: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl From<&Endpoint> for EndpointResponse {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            id: endpoint.id.0,
            url: endpoint.url.clone(),
            description: endpoint.description.clone(),
            events: endpoint.events.clone(),
            is_active: endpoint.is_active,
            max_concurrency: endpoint.max_concurrency,
            custom_headers: endpoint.custom_headers().clone(),
            created_at: endpoint.created_at,
            updated_at: endpoint.updated_at,
        }
    }
}

/// Response of `POST /webhooks`; the only place the secret is shown.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedEndpointResponse {
    /// The stored endpoint.
    #[serde(flatten)]
    pub endpoint: EndpointResponse,
    /// Signing secret, hex encoded.
    pub secret: String,
}

/// Response of `GET /webhooks`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointList {
    /// Endpoints, newest first.
    pub endpoints: Vec<EndpointResponse>,
}

/// Response of `POST /webhooks/{id}/test`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TestWebhookResponse {
    /// Whether the subscriber answered 2xx.
    pub success: bool,
    /// HTTP status, if a response arrived.
    pub status_code: Option<u16>,
    /// Truncated response body.
    pub response_body: Option<String>,
    /// Failure description.
    pub error: Option<String>,
    /// Round-trip time.
    pub duration_ms: u64,
}

impl From<TestDeliveryResult> for TestWebhookResponse {
    fn from(result: TestDeliveryResult) -> Self {
        Self {
            success: result.success,
            status_code: result.status_code,
            response_body: result.response_body,
            error: result.error,
            duration_ms: result.duration_ms,
        }
    }
}

/// Lists the caller's endpoints.
#[instrument(name = "list_endpoints", skip(state, query), fields(owner = %owner))]
pub async fn list_endpoints(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    query: Result<Query<ListEndpointsQuery>, QueryRejection>,
) -> Result<Json<EndpointList>, ApiError> {
    let Query(query) = query?;
    let filter = EndpointFilter { is_active: query.active, event_type: query.event_type };

    let endpoints = state.ingress.list_endpoints(&owner, &filter).await?;
    Ok(Json(EndpointList { endpoints: endpoints.iter().map(EndpointResponse::from).collect() }))
}

/// Creates an endpoint and returns it with its secret.
#[instrument(name = "create_endpoint", skip(state, body), fields(owner = %owner))]
pub async fn create_endpoint(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    body: Result<Json<CreateEndpointRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let new = NewEndpoint {
        url: request.url,
        description: request.description,
        events: request.events,
        custom_headers: request.custom_headers,
        max_concurrency: request.max_concurrency,
        is_active: request.is_active,
    };

    let endpoint = state.ingress.create_endpoint(&owner, new).await?;
    info!(endpoint_id = %endpoint.id, "endpoint created via api");

    let response = CreatedEndpointResponse {
        endpoint: EndpointResponse::from(&endpoint),
        secret: endpoint.secret.clone(),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Fetches one endpoint.
#[instrument(name = "get_endpoint", skip(state, id), fields(owner = %owner))]
pub async fn get_endpoint(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<EndpointResponse>, ApiError> {
    let Path(id) = id?;
    let endpoint = state.ingress.get_endpoint(&owner, EndpointId(id)).await?;
    Ok(Json(EndpointResponse::from(&endpoint)))
}

/// Updates url, events, active flag, headers, or cap.
#[instrument(name = "update_endpoint", skip(state, id, body), fields(owner = %owner))]
pub async fn update_endpoint(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<UpdateEndpointRequest>, JsonRejection>,
) -> Result<Json<EndpointResponse>, ApiError> {
    let Path(id) = id?;
    let Json(request) = body?;
    let update = EndpointUpdate {
        url: request.url,
        description: request.description,
        events: request.events,
        is_active: request.is_active,
        custom_headers: request.custom_headers,
        max_concurrency: request.max_concurrency,
    };

    let endpoint = state.ingress.update_endpoint(&owner, EndpointId(id), update).await?;
    Ok(Json(EndpointResponse::from(&endpoint)))
}

/// Deletes an endpoint.
#[instrument(name = "delete_endpoint", skip(state, id), fields(owner = %owner))]
pub async fn delete_endpoint(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.ingress.delete_endpoint(&owner, EndpointId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Sends a synthetic ping to an endpoint.
#[instrument(name = "test_endpoint", skip(state, id), fields(owner = %owner))]
pub async fn test_endpoint(
    State(state): State<AppState>,
    Extension(owner): Extension<OwnerId>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TestWebhookResponse>, ApiError> {
    let Path(id) = id?;
    let result = state.ingress.test_webhook(&owner, EndpointId(id)).await?;
    Ok(Json(result.into()))
}
