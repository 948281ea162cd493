//! HTTP server configuration and request routing.
//!
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement (30s)
//! 4. Bearer authentication: owner tokens on the management routes, producer
//!    tokens on the internal event route
//! 5. Handler execution
//!
//! # Graceful Shutdown
//!
//! The server stops accepting connections when the shutdown future resolves
//! and waits for in-flight requests. The caller then drains the engine.

use std::{future::Future, net::SocketAddr, time::Duration};

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, middleware::auth::auth_middleware, AppState};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use homechef_api::{create_router, AppState};
///
/// fn app(state: AppState) -> axum::Router {
///     create_router(state)
/// }
/// ```
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let management_routes = Router::new()
        .route("/webhooks", get(handlers::list_endpoints).post(handlers::create_endpoint))
        .route("/webhooks/events", get(handlers::list_event_types))
        .route("/webhooks/deliveries", get(handlers::list_deliveries))
        .route("/webhooks/deliveries/{id}", get(handlers::get_delivery))
        .route("/webhooks/deliveries/{id}/retry", post(handlers::retry_delivery))
        .route(
            "/webhooks/{id}",
            get(handlers::get_endpoint)
                .put(handlers::update_endpoint)
                .delete(handlers::delete_endpoint),
        )
        .route("/webhooks/{id}/test", post(handlers::test_endpoint));

    // One byte of headroom lets ingress report the measured size; anything
    // larger is rejected while buffering and mapped by the handler.
    let internal_routes = Router::new()
        .route("/events/{event_type}", post(handlers::enqueue_event))
        .layer(DefaultBodyLimit::max(state.max_payload_size.saturating_add(1)))
        .route_layer(middleware::from_fn_with_state(
            state.producer_verifier.clone(),
            auth_middleware,
        ));

    let management_routes = management_routes
        .route_layer(middleware::from_fn_with_state(state.verifier.clone(), auth_middleware));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", management_routes)
        .nest("/internal/v1", internal_routes)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Adds an `X-Request-Id` header to every response.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;
    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the API on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or the listener
/// fails.
pub async fn start_server<F>(state: AppState, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
        () = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }
}
