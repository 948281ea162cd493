//! Core domain models and strongly-typed identifiers.
//!
//! Defines endpoints (subscriptions), deliveries, the closed event catalog,
//! and newtype ID wrappers for compile-time type safety. Includes database
//! serialization traits and the transitions a delivery goes through.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Event type sent with the synthetic test delivery. Never subscribable.
pub const PING_EVENT: &str = "ping";

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl sqlx::Type<PgDb> for $name {
            fn type_info() -> PgTypeInfo {
                <Uuid as sqlx::Type<PgDb>>::type_info()
            }
        }

        impl<'r> sqlx::Decode<'r, PgDb> for $name {
            fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
                let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
                Ok(Self(uuid))
            }
        }

        impl sqlx::Encode<'_, PgDb> for $name {
            fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
                <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
            }
        }

        impl sqlx::postgres::PgHasArrayType for $name {
            fn array_type_info() -> PgTypeInfo {
                <Uuid as sqlx::postgres::PgHasArrayType>::array_type_info()
            }
        }
    };
}

uuid_id! {
    /// Identifies a registered webhook endpoint (subscription).
    EndpointId
}

uuid_id! {
    /// Identifies one produced event. Assigned by ingress at fan-out time and
    /// shared by every delivery created for that event.
    EventId
}

uuid_id! {
    /// Identifies one delivery lineage. Sent to subscribers as
    /// `X-HomeChef-Delivery` and usable by them as an idempotency key.
    DeliveryId
}

/// Principal that owns an endpoint, as resolved by the bearer-token verifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    /// Creates an owner id from any string-like principal.
    pub fn new(principal: impl Into<String>) -> Self {
        Self(principal.into())
    }

    /// Returns the principal as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl sqlx::Type<PgDb> for OwnerId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OwnerId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(s))
    }
}

impl sqlx::Encode<'_, PgDb> for OwnerId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.0.as_str(), buf)
    }
}

/// Returned when a string is not part of the event catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

/// Closed catalog of marketplace events that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// A customer placed an order.
    #[serde(rename = "order.created")]
    OrderCreated,
    /// Order contents or state changed.
    #[serde(rename = "order.updated")]
    OrderUpdated,
    /// Order cancelled by customer, chef, or support.
    #[serde(rename = "order.cancelled")]
    OrderCancelled,
    /// Order handed to the customer.
    #[serde(rename = "order.delivered")]
    OrderDelivered,
    /// Payment captured.
    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded,
    /// Payment declined or errored.
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    /// Payment refunded in full or in part.
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,
    /// Chef passed verification.
    #[serde(rename = "chef.approved")]
    ChefApproved,
    /// Chef profile or menu changed.
    #[serde(rename = "chef.updated")]
    ChefUpdated,
    /// Delivery partner assigned to an order.
    #[serde(rename = "delivery.assigned")]
    DeliveryAssigned,
    /// Delivery partner collected the order.
    #[serde(rename = "delivery.picked_up")]
    DeliveryPickedUp,
    /// Delivery partner completed the drop-off.
    #[serde(rename = "delivery.completed")]
    DeliveryCompleted,
    /// Customer left a review.
    #[serde(rename = "review.created")]
    ReviewCreated,
    /// Customer tipped a chef or delivery partner.
    #[serde(rename = "tip.created")]
    TipCreated,
}

impl EventType {
    /// Every event type in the catalog, in a stable order.
    pub const ALL: [EventType; 14] = [
        Self::OrderCreated,
        Self::OrderUpdated,
        Self::OrderCancelled,
        Self::OrderDelivered,
        Self::PaymentSucceeded,
        Self::PaymentFailed,
        Self::PaymentRefunded,
        Self::ChefApproved,
        Self::ChefUpdated,
        Self::DeliveryAssigned,
        Self::DeliveryPickedUp,
        Self::DeliveryCompleted,
        Self::ReviewCreated,
        Self::TipCreated,
    ];

    /// Wire name of the event type, as sent in `X-HomeChef-Event`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderUpdated => "order.updated",
            Self::OrderCancelled => "order.cancelled",
            Self::OrderDelivered => "order.delivered",
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentFailed => "payment.failed",
            Self::PaymentRefunded => "payment.refunded",
            Self::ChefApproved => "chef.approved",
            Self::ChefUpdated => "chef.updated",
            Self::DeliveryAssigned => "delivery.assigned",
            Self::DeliveryPickedUp => "delivery.picked_up",
            Self::DeliveryCompleted => "delivery.completed",
            Self::ReviewCreated => "review.created",
            Self::TipCreated => "tip.created",
        }
    }

    /// Short human description, used by the catalog listing.
    pub const fn description(self) -> &'static str {
        match self {
            Self::OrderCreated => "A customer placed an order",
            Self::OrderUpdated => "An order's contents or state changed",
            Self::OrderCancelled => "An order was cancelled",
            Self::OrderDelivered => "An order was handed to the customer",
            Self::PaymentSucceeded => "A payment was captured",
            Self::PaymentFailed => "A payment was declined or errored",
            Self::PaymentRefunded => "A payment was refunded",
            Self::ChefApproved => "A chef passed verification",
            Self::ChefUpdated => "A chef profile or menu changed",
            Self::DeliveryAssigned => "A delivery partner was assigned",
            Self::DeliveryPickedUp => "A delivery partner collected the order",
            Self::DeliveryCompleted => "A delivery partner completed the drop-off",
            Self::ReviewCreated => "A customer left a review",
            Self::TipCreated => "A customer left a tip",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl sqlx::Type<PgDb> for EventType {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for EventType {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for EventType {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl sqlx::postgres::PgHasArrayType for EventType {
    fn array_type_info() -> PgTypeInfo {
        <String as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

/// Delivery lifecycle status.
///
/// ```text
/// Pending -> Delivering -> Succeeded
///    ^            |
///    +-- retry ---+-> Failed (permanent, budget out, endpoint gone)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its next attempt at `next_retry_at`.
    Pending,
    /// Leased by a scheduler or worker; an attempt is running.
    Delivering,
    /// Terminal success.
    Succeeded,
    /// Terminal failure.
    Failed,
}

impl DeliveryStatus {
    /// Returns true for `Succeeded` and `Failed`.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Database and API representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivering => "delivering",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivering" => Ok(Self::Delivering),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid delivery status: {s}")),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// Registered webhook endpoint.
///
/// The secret is shown to the owner once at creation and afterwards only used
/// to sign outbound requests; `Debug` output redacts it.
#[derive(Clone, sqlx::FromRow)]
pub struct Endpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Principal that created the endpoint.
    pub owner_id: OwnerId,

    /// Absolute http or https target URL.
    pub url: String,

    /// Optional free-form label.
    pub description: Option<String>,

    /// Subscribed event types. Never empty.
    pub events: Vec<EventType>,

    /// Shared HMAC secret, 32 random bytes hex-encoded.
    pub secret: String,

    /// Paused endpoints receive no new deliveries and fail pending retries.
    pub is_active: bool,

    /// Optional cap on concurrent requests to this endpoint.
    pub max_concurrency: Option<i32>,

    /// Extra request headers, restricted to a safelist at write time.
    pub custom_headers: sqlx::types::Json<BTreeMap<String, String>>,

    /// When this endpoint was created.
    pub created_at: DateTime<Utc>,

    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Whether this endpoint receives deliveries for `event_type` right now.
    pub fn receives(&self, event_type: EventType) -> bool {
        self.is_active && self.events.contains(&event_type)
    }

    /// Concurrency cap as a permit count, if one is configured.
    pub fn concurrency_cap(&self) -> Option<usize> {
        self.max_concurrency.and_then(|cap| usize::try_from(cap).ok()).filter(|cap| *cap > 0)
    }

    /// Custom headers to attach to outbound requests.
    pub fn custom_headers(&self) -> &BTreeMap<String, String> {
        &self.custom_headers.0
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("url", &self.url)
            .field("events", &self.events)
            .field("secret", &"[redacted]")
            .field("is_active", &self.is_active)
            .field("max_concurrency", &self.max_concurrency)
            .field("custom_headers", &self.custom_headers.0)
            .finish_non_exhaustive()
    }
}

/// Partial update for an endpoint. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EndpointPatch {
    /// New target URL.
    pub url: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// Replacement set of subscribed event types.
    pub events: Option<Vec<EventType>>,
    /// Pause or resume.
    pub is_active: Option<bool>,
    /// Replacement custom header map.
    pub custom_headers: Option<BTreeMap<String, String>>,
    /// New concurrency cap; `Some(None)` removes it.
    pub max_concurrency: Option<Option<i32>>,
}

impl EndpointPatch {
    /// Returns true when the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.description.is_none()
            && self.events.is_none()
            && self.is_active.is_none()
            && self.custom_headers.is_none()
            && self.max_concurrency.is_none()
    }

    /// Applies the patch in place and bumps `updated_at`.
    pub fn apply(&self, endpoint: &mut Endpoint, now: DateTime<Utc>) {
        if let Some(url) = &self.url {
            endpoint.url.clone_from(url);
        }
        if let Some(description) = &self.description {
            endpoint.description.clone_from(description);
        }
        if let Some(events) = &self.events {
            endpoint.events.clone_from(events);
        }
        if let Some(is_active) = self.is_active {
            endpoint.is_active = is_active;
        }
        if let Some(headers) = &self.custom_headers {
            endpoint.custom_headers = sqlx::types::Json(headers.clone());
        }
        if let Some(cap) = self.max_concurrency {
            endpoint.max_concurrency = cap;
        }
        endpoint.updated_at = now;
    }
}

/// One event's delivery lineage to one endpoint.
///
/// The payload is frozen at creation; every attempt sends the same bytes and
/// therefore the same signature.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Target endpoint. Not a foreign key; survives endpoint deletion.
    pub endpoint_id: EndpointId,

    /// Event this delivery was fanned out from.
    pub event_id: EventId,

    /// Catalog type of the event.
    pub event_type: EventType,

    /// Exact payload bytes supplied to enqueue.
    #[serde(skip)]
    pub payload: Vec<u8>,

    /// Attempts started so far. Never decreases.
    pub attempt_count: i32,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// HTTP status of the most recent response, if any.
    pub response_status: Option<i32>,

    /// Most recent response body, truncated to 4 KiB.
    pub response_body: Option<String>,

    /// Most recent transport error or failure reason.
    pub last_error: Option<String>,

    /// When the delivery record was created.
    pub created_at: DateTime<Utc>,

    /// When the first attempt started.
    pub first_attempted_at: Option<DateTime<Utc>>,

    /// When the latest attempt started.
    pub last_attempted_at: Option<DateTime<Utc>>,

    /// When the next attempt becomes due. Set only while pending.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// When the current claim lapses if its holder never reports back.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Terminal failure timestamp.
    pub failed_at: Option<DateTime<Utc>>,

    /// Terminal success timestamp.
    pub succeeded_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// Creates a pending delivery with zero attempts.
    ///
    /// `next_retry_at` also becomes the lease held by whoever created the
    /// record, so the creator can attempt it without a scheduler claim.
    pub fn new(
        endpoint_id: EndpointId,
        event_id: EventId,
        event_type: EventType,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            endpoint_id,
            event_id,
            event_type,
            payload,
            attempt_count: 0,
            status: DeliveryStatus::Pending,
            response_status: None,
            response_body: None,
            last_error: None,
            created_at,
            first_attempted_at: None,
            last_attempted_at: None,
            next_retry_at: Some(next_retry_at),
            lease_expires_at: Some(next_retry_at),
            failed_at: None,
            succeeded_at: None,
        }
    }

    /// The claim currently held on this delivery, if any.
    pub fn claim(&self) -> Option<Claim> {
        self.lease_expires_at.map(|lease| Claim { delivery_id: self.id, lease })
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Exclusive right to attempt a delivery.
///
/// The lease a claimant was granted doubles as its token: attempt and
/// release calls only apply while the stored lease still matches, so a
/// holder whose lease was taken over by a newer claim cannot act on the
/// delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Claim {
    /// Claimed delivery.
    pub delivery_id: DeliveryId,
    /// Lease granted with the claim.
    pub lease: DateTime<Utc>,
}

/// How an attempt resolved the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResolution {
    /// 2xx response; terminal.
    Succeeded,
    /// Retriable failure with budget left; back to pending at this time.
    RetryAt(DateTime<Utc>),
    /// Permanent failure, exhausted budget, or endpoint gone; terminal.
    Failed,
}

/// Result of one attempt, as persisted by `Store::record_attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Attempt number this outcome belongs to. Stale reports are ignored.
    pub attempt: i32,
    /// New state of the delivery.
    pub resolution: AttemptResolution,
    /// HTTP status, when a response was received.
    pub response_status: Option<i32>,
    /// Truncated response body, when a response was received.
    pub response_body: Option<String>,
    /// Transport error or failure reason.
    pub error: Option<String>,
    /// When the attempt finished.
    pub completed_at: DateTime<Utc>,
}

impl AttemptOutcome {
    /// Status the delivery will be in after this outcome is recorded.
    pub fn status(&self) -> DeliveryStatus {
        match self.resolution {
            AttemptResolution::Succeeded => DeliveryStatus::Succeeded,
            AttemptResolution::RetryAt(_) => DeliveryStatus::Pending,
            AttemptResolution::Failed => DeliveryStatus::Failed,
        }
    }

    /// Applies this outcome to an in-memory delivery record.
    pub fn apply(&self, delivery: &mut Delivery) {
        delivery.status = self.status();
        delivery.response_status = self.response_status;
        delivery.response_body.clone_from(&self.response_body);
        delivery.last_error.clone_from(&self.error);
        delivery.lease_expires_at = None;
        match self.resolution {
            AttemptResolution::Succeeded => {
                delivery.next_retry_at = None;
                delivery.succeeded_at = Some(self.completed_at);
            },
            AttemptResolution::RetryAt(at) => {
                delivery.next_retry_at = Some(at);
            },
            AttemptResolution::Failed => {
                delivery.next_retry_at = None;
                delivery.failed_at = Some(self.completed_at);
            },
        }
    }
}

/// Filter for listing an owner's endpoints.
#[derive(Debug, Clone, Default)]
pub struct EndpointFilter {
    /// Only active or only paused endpoints.
    pub is_active: Option<bool>,
    /// Only endpoints subscribed to this type.
    pub event_type: Option<EventType>,
}

impl EndpointFilter {
    /// Returns true when `endpoint` passes the filter.
    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        self.is_active.is_none_or(|active| endpoint.is_active == active)
            && self.event_type.is_none_or(|event_type| endpoint.events.contains(&event_type))
    }
}

/// Filter for querying deliveries.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    /// Restrict to deliveries targeting endpoints owned by this principal.
    pub owner_id: Option<OwnerId>,
    /// Restrict to one endpoint.
    pub endpoint_id: Option<EndpointId>,
    /// Restrict to one status.
    pub status: Option<DeliveryStatus>,
    /// Restrict to one event type.
    pub event_type: Option<EventType>,
    /// Created at or after.
    pub since: Option<DateTime<Utc>>,
    /// Created strictly before.
    pub until: Option<DateTime<Utc>>,
}

impl DeliveryFilter {
    /// Returns true when `delivery` passes every non-owner criterion.
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.endpoint_id.is_none_or(|id| delivery.endpoint_id == id)
            && self.status.is_none_or(|status| delivery.status == status)
            && self.event_type.is_none_or(|event_type| delivery.event_type == event_type)
            && self.since.is_none_or(|since| delivery.created_at >= since)
            && self.until.is_none_or(|until| delivery.created_at < until)
    }
}

/// Offset pagination, newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Maximum rows returned.
    pub limit: u32,
    /// Rows skipped.
    pub offset: u32,
}

impl Page {
    /// Default page size.
    pub const DEFAULT_LIMIT: u32 = 50;
    /// Largest accepted page size.
    pub const MAX_LIMIT: u32 = 500;

    /// Creates a page, clamping the limit to `1..=MAX_LIMIT`.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
