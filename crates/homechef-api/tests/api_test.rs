//! Router-level tests for the management, internal and health routes.

use std::sync::Arc;

use axum::{body::Body, Router};
use homechef_api::{create_router, AppState, StaticTokenVerifier};
use homechef_core::{DeliveryId, DeliveryStatus, OwnerId};
use homechef_testing::TestEnv;
use http::{header, Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const TOKEN: &str = "chef-test-token";
const OTHER_TOKEN: &str = "other-chef-token";
const PRODUCER_TOKEN: &str = "orders-service-token";

fn router(env: &TestEnv) -> Router {
    let verifier = StaticTokenVerifier::new([
        (env.owner().clone(), TOKEN.to_string()),
        (OwnerId::new("chef-other"), OTHER_TOKEN.to_string()),
    ]);
    let producers =
        StaticTokenVerifier::new([(OwnerId::new("orders-service"), PRODUCER_TOKEN.to_string())]);
    create_router(AppState::new(env.engine(), Arc::new(verifier), Arc::new(producers)))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Body,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = request.header(header::CONTENT_TYPE, "application/json").body(body).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value =
        if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, Some(TOKEN), Body::empty()).await
}

async fn send_json(app: &Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, method, uri, Some(TOKEN), Body::from(body.to_string())).await
}

async fn create_endpoint(app: &Router, url: &str, events: &[&str]) -> Value {
    let (status, body) =
        send_json(app, Method::POST, "/api/v1/webhooks", json!({ "url": url, "events": events }))
            .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn health_routes_need_no_token() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let (status, body) = call(&app, Method::GET, "/health", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"]["status"], "up");

    let (status, _) = call(&app, Method::GET, "/ready", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/live", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn health_reports_store_outage() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    env.store().set_unavailable(true);
    let (status, body) = call(&app, Method::GET, "/health", None, Body::empty()).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn management_routes_require_a_valid_token() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let (status, body) = call(&app, Method::GET, "/api/v1/webhooks", None, Body::empty()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) =
        call(&app, Method::GET, "/api/v1/webhooks", Some("wrong"), Body::empty()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &app,
        Method::POST,
        "/internal/v1/events/order.created",
        None,
        Body::from("{}"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) =
        call(&app, Method::GET, "/api/v1/webhooks", Some(PRODUCER_TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn owner_token_cannot_publish_events() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    let app = router(&env);
    create_endpoint(&app, &env.hook_url(), &["order.created"]).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/order.created",
        Some(TOKEN),
        Body::from(r#"{"order_id":"forged"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (_, list) = get(&app, "/api/v1/webhooks/deliveries").await;
    assert!(list["deliveries"].as_array().unwrap().is_empty());
    assert!(env.received_requests().await.is_empty());
}

#[tokio::test]
async fn created_endpoint_shows_secret_only_once() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let created = create_endpoint(&app, &env.hook_url(), &["order.created", "tip.created"]).await;
    let secret = created["secret"].as_str().unwrap();
    assert_eq!(secret.len(), 64);
    assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(created["is_active"], true);
    assert_eq!(created["events"], json!(["order.created", "tip.created"]));

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = get(&app, &format!("/api/v1/webhooks/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert!(fetched.get("secret").is_none());

    let (status, list) = get(&app, "/api/v1/webhooks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["endpoints"].as_array().unwrap().len(), 1);
    assert!(list["endpoints"][0].get("secret").is_none());
}

#[tokio::test]
async fn invalid_endpoints_are_rejected() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/webhooks",
        json!({ "url": "ftp://kitchen.example", "events": ["order.created"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_url");

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/webhooks",
        json!({ "url": env.hook_url(), "events": ["order.eaten"] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_event_type");

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/webhooks",
        json!({
            "url": env.hook_url(),
            "events": ["order.created"],
            "custom_headers": { "Authorization": "Bearer leak" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsafe_header");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/webhooks",
        Some(TOKEN),
        Body::from("{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = get(&app, "/api/v1/webhooks/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn endpoints_are_scoped_to_their_owner() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let created = create_endpoint(&app, &env.hook_url(), &["order.created"]).await;
    let uri = format!("/api/v1/webhooks/{}", created["id"].as_str().unwrap());

    let (status, body) = call(&app, Method::GET, &uri, Some(OTHER_TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = call(&app, Method::DELETE, &uri, Some(OTHER_TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) =
        call(&app, Method::GET, "/api/v1/webhooks", Some(OTHER_TOKEN), Body::empty()).await;
    assert!(list["endpoints"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn update_pauses_and_filters_apply() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let created = create_endpoint(&app, &env.hook_url(), &["order.created"]).await;
    create_endpoint(&app, &env.hook_url(), &["tip.created"]).await;
    let uri = format!("/api/v1/webhooks/{}", created["id"].as_str().unwrap());

    let (status, updated) = send_json(
        &app,
        Method::PUT,
        &uri,
        json!({ "is_active": false, "description": "night kitchen" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["is_active"], false);
    assert_eq!(updated["description"], "night kitchen");
    assert_eq!(updated["events"], json!(["order.created"]));

    let (_, paused) = get(&app, "/api/v1/webhooks?active=false").await;
    assert_eq!(paused["endpoints"].as_array().unwrap().len(), 1);
    assert_eq!(paused["endpoints"][0]["id"], created["id"]);

    let (_, tips) = get(&app, "/api/v1/webhooks?event_type=tip.created").await;
    assert_eq!(tips["endpoints"].as_array().unwrap().len(), 1);
    assert_eq!(tips["endpoints"][0]["events"], json!(["tip.created"]));

    let (_, cleared) = send_json(&app, Method::PUT, &uri, json!({ "description": null })).await;
    assert_eq!(cleared["description"], Value::Null);
    assert_eq!(cleared["is_active"], false);
}

#[tokio::test]
async fn delete_removes_endpoint() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let created = create_endpoint(&app, &env.hook_url(), &["order.created"]).await;
    let uri = format!("/api/v1/webhooks/{}", created["id"].as_str().unwrap());

    let (status, body) = call(&app, Method::DELETE, &uri, Some(TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn catalog_lists_subscribable_events() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let (status, body) = get(&app, "/api/v1/webhooks/events").await;
    assert_eq!(status, StatusCode::OK);

    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 14);
    assert!(events.iter().any(|e| e["type"] == "order.created"));
    assert!(events.iter().any(|e| e["type"] == "delivery.picked_up"));
    assert!(events.iter().all(|e| e["type"] != "ping"));
    assert!(events.iter().all(|e| !e["description"].as_str().unwrap().is_empty()));
}

#[tokio::test]
async fn internal_enqueue_delivers_and_is_queryable() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    let app = router(&env);
    create_endpoint(&app, &env.hook_url(), &["order.created"]).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/order.created",
        Some(PRODUCER_TOKEN),
        Body::from(r#"{"order_id":"ord-1","total_cents":2599}"#),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let ids = body["delivery_ids"].as_array().unwrap();
    assert_eq!(ids.len(), 1);

    let id: Uuid = ids[0].as_str().unwrap().parse().unwrap();
    env.wait_for_status(DeliveryId(id), DeliveryStatus::Succeeded).await.unwrap();

    let (status, delivery) = get(&app, &format!("/api/v1/webhooks/deliveries/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivery["status"], "succeeded");
    assert_eq!(delivery["attempt_count"], 1);
    assert_eq!(delivery["payload"]["order_id"], "ord-1");
    assert_eq!(delivery["response_status"], 200);

    let (_, list) = get(&app, "/api/v1/webhooks/deliveries?status=succeeded").await;
    assert_eq!(list["deliveries"].as_array().unwrap().len(), 1);
    assert_eq!(list["limit"], 50);

    let (_, none) = get(&app, "/api/v1/webhooks/deliveries?status=failed").await;
    assert!(none["deliveries"].as_array().unwrap().is_empty());

    let (status, _) = call(
        &app,
        Method::GET,
        &format!("/api/v1/webhooks/deliveries/{id}"),
        Some(OTHER_TOKEN),
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn internal_enqueue_without_subscribers_returns_empty_ids() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let (status, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/review.created",
        Some(PRODUCER_TOKEN),
        Body::from("{}"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["delivery_ids"], json!([]));
}

#[tokio::test]
async fn internal_enqueue_rejects_bad_events() {
    let env = TestEnv::builder().max_payload_size(32).build().await.unwrap();
    let app = router(&env);

    let (status, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/ping",
        Some(PRODUCER_TOKEN),
        Body::from("{}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_event_type");

    let oversized = format!(r#"{{"note":"{}"}}"#, "x".repeat(22));
    assert_eq!(oversized.len(), 33);
    let (status, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/order.created",
        Some(PRODUCER_TOKEN),
        Body::from(oversized),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");
}

#[tokio::test]
async fn body_far_over_the_limit_gets_a_json_413() {
    let env = TestEnv::builder().max_payload_size(32).build().await.unwrap();
    let app = router(&env);

    let (status, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/order.created",
        Some(PRODUCER_TOKEN),
        Body::from("x".repeat(64 * 1024)),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "payload_too_large");
    assert!(body["message"].as_str().unwrap().contains("32 byte limit"));
}

#[tokio::test]
async fn manual_retry_only_accepts_failed_deliveries() {
    let env = TestEnv::builder().max_attempts(1).build().await.unwrap();
    env.respond_with(400).await;
    let app = router(&env);
    create_endpoint(&app, &env.hook_url(), &["order.cancelled"]).await;

    let (_, body) = call(
        &app,
        Method::POST,
        "/internal/v1/events/order.cancelled",
        Some(PRODUCER_TOKEN),
        Body::from(r#"{"order_id":"ord-9"}"#),
    )
    .await;
    let id: Uuid = body["delivery_ids"][0].as_str().unwrap().parse().unwrap();
    env.wait_for_status(DeliveryId(id), DeliveryStatus::Failed).await.unwrap();

    let retry_uri = format!("/api/v1/webhooks/deliveries/{id}/retry");
    let (status, requeued) = call(&app, Method::POST, &retry_uri, Some(TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(requeued["status"], "pending");
    assert_eq!(requeued["attempt_count"], 1);

    let (status, body) = call(&app, Method::POST, &retry_uri, Some(TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_retryable");
}

#[tokio::test]
async fn test_route_pings_the_endpoint() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(204).await;
    let app = router(&env);

    let created = create_endpoint(&app, &env.hook_url(), &["order.created"]).await;
    let uri = format!("/api/v1/webhooks/{}/test", created["id"].as_str().unwrap());

    let (status, body) = call(&app, Method::POST, &uri, Some(TOKEN), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status_code"], 204);

    let requests = env.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].headers.get("x-homechef-event").unwrap(), "ping");

    let (_, deliveries) = get(&app, "/api/v1/webhooks/deliveries").await;
    assert!(deliveries["deliveries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn responses_carry_request_id() {
    let env = TestEnv::new().await.unwrap();
    let app = router(&env);

    let request = Request::builder().uri("/live").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    let request_id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert!(Uuid::parse_str(request_id).is_ok());
}
