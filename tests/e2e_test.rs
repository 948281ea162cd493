//! End-to-end tests: producer route, engine, subscriber, and management API
//! wired together as in production, with an in-memory store.

use std::{sync::Arc, time::Duration};

use axum::{body::Body, Router};
use homechef_api::{create_router, AppState, StaticTokenVerifier};
use homechef_core::{signing, DeliveryId, DeliveryStatus, OwnerId};
use homechef_testing::TestEnv;
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const TOKEN: &str = "kitchen-ops-token";
const PRODUCER_TOKEN: &str = "order-service-token";

fn app(env: &TestEnv) -> Router {
    let verifier = StaticTokenVerifier::new([(env.owner().clone(), TOKEN.to_string())]);
    let producers =
        StaticTokenVerifier::new([(OwnerId::new("order-service"), PRODUCER_TOKEN.to_string())]);
    create_router(AppState::new(env.engine(), Arc::new(verifier), Arc::new(producers)))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    body: impl Into<Body>,
) -> (StatusCode, Value) {
    let token = if uri.starts_with("/internal/") { PRODUCER_TOKEN } else { TOKEN };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value =
        if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn subscribe(app: &Router, url: &str, events: &[&str]) -> (String, String) {
    let body = json!({ "url": url, "events": events, "custom_headers": { "X-Kitchen": "north" } });
    let (status, created) = call(app, Method::POST, "/api/v1/webhooks", body.to_string()).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    (
        created["id"].as_str().unwrap().to_string(),
        created["secret"].as_str().unwrap().to_string(),
    )
}

async fn publish(app: &Router, event_type: &str, payload: &'static str) -> Vec<DeliveryId> {
    let (status, body) =
        call(app, Method::POST, &format!("/internal/v1/events/{event_type}"), payload).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    body["delivery_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| DeliveryId(id.as_str().unwrap().parse::<Uuid>().unwrap()))
        .collect()
}

#[tokio::test]
async fn subscriber_receives_verifiable_exact_payload() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    let app = app(&env);

    let (_, secret) = subscribe(&app, &env.hook_url(), &["payment.succeeded"]).await;
    let payload = r#"{"payment_id":"pay-77","amount_cents":4150,"currency":"USD"}"#;
    let ids = publish(&app, "payment.succeeded", payload).await;
    assert_eq!(ids.len(), 1);

    env.wait_for_status(ids[0], DeliveryStatus::Succeeded).await.unwrap();

    let requests = env.received_requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.body, payload.as_bytes());

    let header = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();
    assert!(signing::verify(&header("x-homechef-signature"), &request.body, &secret));
    assert_eq!(header("x-homechef-event"), "payment.succeeded");
    assert_eq!(header("x-homechef-delivery"), ids[0].to_string());
    assert_eq!(header("content-type"), "application/json");
    assert_eq!(header("x-kitchen"), "north");
    assert!(header("x-homechef-timestamp").parse::<i64>().is_ok());
}

#[tokio::test]
async fn transient_failure_is_retried_and_visible_through_api() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with_times(503, 1).await;
    env.respond_with(200).await;
    let app = app(&env);

    let (endpoint_id, _) = subscribe(&app, &env.hook_url(), &["order.delivered"]).await;
    let ids = publish(&app, "order.delivered", r#"{"order_id":"ord-5"}"#).await;

    let after_first = env.wait_for_attempts(ids[0], 1).await.unwrap();
    assert_eq!(after_first.status, DeliveryStatus::Pending);
    assert_eq!(after_first.response_status, Some(503));
    let attempted_at = after_first.last_attempted_at.unwrap();
    assert_eq!(after_first.next_retry_at, Some(attempted_at + chrono::Duration::seconds(60)));

    let (_, pending) = call(
        &app,
        Method::GET,
        &format!("/api/v1/webhooks/deliveries?endpoint_id={endpoint_id}&status=pending"),
        Body::empty(),
    )
    .await;
    assert_eq!(pending["deliveries"].as_array().unwrap().len(), 1);

    let report = env.fire_retry(ids[0]).await.unwrap();
    assert_eq!(report.claimed, 1);
    env.wait_for_status(ids[0], DeliveryStatus::Succeeded).await.unwrap();

    let (_, delivery) =
        call(&app, Method::GET, &format!("/api/v1/webhooks/deliveries/{}", ids[0]), Body::empty())
            .await;
    assert_eq!(delivery["status"], "succeeded");
    assert_eq!(delivery["attempt_count"], 2);
    assert_eq!(delivery["response_status"], 200);
    assert_eq!(delivery["next_retry_at"], Value::Null);
}

#[tokio::test]
async fn fan_out_reaches_every_subscriber_once() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(202).await;
    let app = app(&env);

    subscribe(&app, &env.hook_url(), &["chef.approved"]).await;
    subscribe(&app, &env.hook_url(), &["chef.approved", "chef.updated"]).await;
    subscribe(&app, &env.hook_url(), &["chef.updated"]).await;

    let ids = publish(&app, "chef.approved", r#"{"chef_id":"chef-12"}"#).await;
    assert_eq!(ids.len(), 2);
    for id in &ids {
        env.wait_for_status(*id, DeliveryStatus::Succeeded).await.unwrap();
    }

    let first = env.delivery(ids[0]).await.unwrap();
    let second = env.delivery(ids[1]).await.unwrap();
    assert_eq!(first.event_id, second.event_id);
    assert_ne!(first.endpoint_id, second.endpoint_id);
    assert_eq!(env.received_requests().await.len(), 2);
}

#[tokio::test]
async fn deleting_endpoint_fails_its_pending_retries() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(500).await;
    let app = app(&env);

    let (endpoint_id, _) = subscribe(&app, &env.hook_url(), &["tip.created"]).await;
    let ids = publish(&app, "tip.created", r#"{"tip_id":"tip-3"}"#).await;
    let pending = env.wait_for_attempts(ids[0], 1).await.unwrap();
    assert_eq!(pending.status, DeliveryStatus::Pending);

    let (status, _) =
        call(&app, Method::DELETE, &format!("/api/v1/webhooks/{endpoint_id}"), Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let failed = env.delivery(ids[0]).await.unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert!(failed.last_error.unwrap().contains("endpoint deleted"));

    env.advance_time(Duration::from_secs(3600));
    let report = env.tick_scheduler().await.unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(env.received_requests().await.len(), 1);
}

#[tokio::test]
async fn shutdown_refuses_new_events_and_reports_degraded() {
    let mut env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    let app = app(&env);
    subscribe(&app, &env.hook_url(), &["review.created"]).await;

    env.shutdown().await.unwrap();

    let (status, body) =
        call(&app, Method::POST, "/internal/v1/events/review.created", r#"{"stars":5}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "shutting_down");

    let (status, health) = call(&app, Method::GET, "/health", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["accepting_events"], false);

    let (status, _) = call(&app, Method::GET, "/ready", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
