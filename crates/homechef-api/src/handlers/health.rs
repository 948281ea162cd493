//! Health check handlers for service monitoring.
//!
//! Provides liveness, readiness, and health endpoints. Health and readiness
//! check the store; liveness only proves the process answers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use homechef_core::{Clock, Store};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::AppState;

/// Health check response structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Individual component health checks
    pub checks: HealthChecks,
    /// Whether new events are still accepted
    pub accepting_events: bool,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Store reachable but the engine is draining
    Degraded,
    /// Store unreachable
    Unhealthy,
}

/// Individual component health check results.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    /// Store connectivity
    pub store: ComponentHealth,
}

/// Health status for individual components.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component status
    pub status: ComponentStatus,
    /// Error message if down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response time in milliseconds
    pub response_time_ms: u64,
}

/// Component-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Up,
    /// Component is failing
    Down,
}

/// Runs health checks against the store with an injectable clock.
pub struct HealthService {
    clock: Arc<dyn Clock>,
}

impl HealthService {
    /// Creates a new health service with the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Probes the store and summarizes overall health.
    pub async fn health_check(&self, store: &dyn Store, accepting_events: bool) -> HealthResponse {
        debug!("performing health check");

        let timestamp = self.clock.now_utc();
        let start_time = self.clock.now();
        let store_health = Self::check_store(store).await;
        let elapsed = start_time.elapsed();

        let status = match (store_health.status, accepting_events) {
            (ComponentStatus::Down, _) => HealthStatus::Unhealthy,
            (ComponentStatus::Up, false) => HealthStatus::Degraded,
            (ComponentStatus::Up, true) => HealthStatus::Healthy,
        };

        HealthResponse {
            status,
            timestamp,
            checks: HealthChecks {
                store: ComponentHealth {
                    response_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    ..store_health
                },
            },
            accepting_events,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn check_store(store: &dyn Store) -> ComponentHealth {
        match store.health_check().await {
            Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None, response_time_ms: 0 },
            Err(e) => {
                error!(error = %e, "store health check failed");
                ComponentHealth {
                    status: ComponentStatus::Down,
                    message: Some(format!("store unavailable: {e}")),
                    response_time_ms: 0,
                }
            },
        }
    }
}

/// Health check endpoint handler.
#[instrument(name = "health_check", skip(app_state))]
pub async fn health_check(State(app_state): State<AppState>) -> Response {
    let response = HealthService::new(app_state.clock.clone())
        .health_check(app_state.store.as_ref(), app_state.ingress.is_accepting())
        .await;

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, store = ?response.checks.store.status, "health check completed");
    (status_code, Json(response)).into_response()
}

/// Readiness check. Not ready while the store is down or the engine drains.
#[instrument(name = "readiness_check", skip(app_state))]
pub async fn readiness_check(State(app_state): State<AppState>) -> Response {
    let response = HealthService::new(app_state.clock.clone())
        .health_check(app_state.store.as_ref(), app_state.ingress.is_accepting())
        .await;

    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded | HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response)).into_response()
}

/// Liveness check; touches no dependencies.
#[instrument(name = "liveness_check", skip(app_state))]
pub async fn liveness_check(State(app_state): State<AppState>) -> Response {
    let response = serde_json::json!({
        "status": "alive",
        "timestamp": app_state.clock.now_utc(),
        "service": "homechef-webhooks"
    });

    (StatusCode::OK, Json(response)).into_response()
}
