//! End-to-end delivery scenarios against a mock subscriber.

use std::time::Duration;

use bytes::Bytes;
use homechef_core::{
    models::{DeliveryFilter, Page},
    signing, Delivery, DeliveryId, DeliveryStatus, EventType, Store,
};
use homechef_delivery::{
    dispatcher::{ENDPOINT_DELETED, ENDPOINT_INACTIVE},
    ingress::EndpointUpdate,
    DispatchJob, IngressError,
};
use homechef_testing::{json_payload, EndpointBuilder, TestEnv, DEFAULT_WAIT};
use wiremock::{Request, ResponseTemplate};

fn header<'a>(request: &'a Request, name: &str) -> &'a str {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_else(|| panic!("missing header {name}"))
}

async fn wait_for_in_flight(env: &TestEnv, count: u64) {
    let deadline = tokio::time::Instant::now() + DEFAULT_WAIT;
    while env.stats().await.in_flight_deliveries < count {
        assert!(tokio::time::Instant::now() < deadline, "no attempt started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn single_delivery(env: &TestEnv, payload: &str) -> Delivery {
    let ids = env.enqueue(EventType::OrderCreated, json_payload(payload)).await.unwrap();
    assert_eq!(ids.len(), 1);
    env.delivery(ids[0]).await.unwrap()
}

#[tokio::test]
async fn happy_path_delivers_signed_payload_once() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let payload = Bytes::from_static(br#"{"id":"o1"}"#);
    let ids = env.enqueue(EventType::OrderCreated, payload.clone()).await.unwrap();
    assert_eq!(ids.len(), 1);

    let delivery = env.wait_for_status(ids[0], DeliveryStatus::Succeeded).await.unwrap();
    assert_eq!(delivery.attempt_count, 1);
    assert_eq!(delivery.response_status, Some(200));
    assert!(delivery.succeeded_at.is_some());
    assert!(delivery.next_retry_at.is_none());

    let requests = env.received_requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.body, payload.to_vec());
    assert_eq!(header(request, "content-type"), "application/json");
    assert_eq!(header(request, "x-homechef-event"), "order.created");
    assert_eq!(header(request, "x-homechef-delivery"), ids[0].to_string());
    assert_eq!(header(request, "x-homechef-timestamp"), env.now().timestamp().to_string());

    let expected = signing::sign(&payload, &endpoint.secret).unwrap();
    assert_eq!(header(request, "x-homechef-signature"), expected);
    assert!(signing::verify(header(request, "x-homechef-signature"), &payload, &endpoint.secret));
}

#[tokio::test]
async fn server_error_is_retried_on_schedule_and_then_succeeds() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with_times(500, 1).await;
    env.respond_with(200).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let enqueued_at = env.now();
    let delivery = single_delivery(&env, "o2").await;

    let after_first = env.wait_for_attempts(delivery.id, 1).await.unwrap();
    assert_eq!(after_first.status, DeliveryStatus::Pending);
    assert_eq!(after_first.response_status, Some(500));
    assert_eq!(after_first.next_retry_at, Some(enqueued_at + chrono::Duration::seconds(60)));

    // Not due yet.
    let early = env.tick_scheduler().await.unwrap();
    assert_eq!(early.claimed, 0);

    let report = env.fire_retry(delivery.id).await.unwrap();
    assert_eq!(report.dispatched, 1);

    let done = env.wait_for_status(delivery.id, DeliveryStatus::Succeeded).await.unwrap();
    assert_eq!(done.attempt_count, 2);
    assert_eq!(env.received_requests().await.len(), 2);
}

#[tokio::test]
async fn retry_after_raises_the_next_attempt_time() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with_template(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let enqueued_at = env.now();
    let delivery = single_delivery(&env, "o3").await;

    let after = env.wait_for_attempts(delivery.id, 1).await.unwrap();
    assert_eq!(after.status, DeliveryStatus::Pending);
    assert_eq!(after.response_status, Some(429));
    assert_eq!(after.next_retry_at, Some(enqueued_at + chrono::Duration::seconds(120)));
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with_template(ResponseTemplate::new(400).set_body_string("bad payload")).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o4").await;
    let failed = env.wait_for_status(delivery.id, DeliveryStatus::Failed).await.unwrap();

    assert_eq!(failed.attempt_count, 1);
    assert_eq!(failed.response_status, Some(400));
    assert_eq!(failed.response_body.as_deref(), Some("bad payload"));
    assert!(failed.next_retry_at.is_none());
    assert!(failed.failed_at.is_some());
}

#[tokio::test]
async fn exhausting_the_attempt_budget_fails_the_delivery() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(503).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o5").await;
    env.wait_for_attempts(delivery.id, 1).await.unwrap();

    env.fire_retry(delivery.id).await.unwrap();
    let second = env.wait_for_attempts(delivery.id, 2).await.unwrap();
    assert_eq!(second.status, DeliveryStatus::Pending);
    // Second retry waits base * 2.
    assert_eq!(
        second.next_retry_at.unwrap() - second.last_attempted_at.unwrap(),
        chrono::Duration::seconds(120)
    );

    env.fire_retry(delivery.id).await.unwrap();
    let last = env.wait_for_status(delivery.id, DeliveryStatus::Failed).await.unwrap();
    assert_eq!(last.attempt_count, 3);
    assert!(last.next_retry_at.is_none());
    assert!(last.last_error.unwrap().contains("maximum attempts"));

    env.advance_time(Duration::from_secs(86_400));
    assert_eq!(env.tick_scheduler().await.unwrap().claimed, 0);
    assert_eq!(env.received_requests().await.len(), 3);
}

#[tokio::test]
async fn signature_is_identical_across_attempts() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with_times(500, 1).await;
    env.respond_with(200).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o6").await;
    env.wait_for_attempts(delivery.id, 1).await.unwrap();
    env.fire_retry(delivery.id).await.unwrap();
    env.wait_for_status(delivery.id, DeliveryStatus::Succeeded).await.unwrap();

    let requests = env.received_requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(
        header(&requests[0], "x-homechef-signature"),
        header(&requests[1], "x-homechef-signature")
    );
    assert_eq!(
        header(&requests[0], "x-homechef-delivery"),
        header(&requests[1], "x-homechef-delivery")
    );
    assert_ne!(
        header(&requests[0], "x-homechef-timestamp"),
        header(&requests[1], "x-homechef-timestamp")
    );
}

#[tokio::test]
async fn endpoint_deleted_mid_attempt_fails_the_delivery() {
    let env = TestEnv::new().await.unwrap();
    env.respond_slowly(200, Duration::from_millis(500)).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o7").await;
    env.wait_for_status(delivery.id, DeliveryStatus::Delivering).await.unwrap();

    env.ingress().delete_endpoint(env.owner(), endpoint.id).await.unwrap();

    let failed = env.wait_for_status(delivery.id, DeliveryStatus::Failed).await.unwrap();
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(failed.response_status, Some(200));
    assert_eq!(failed.last_error.as_deref(), Some(ENDPOINT_DELETED));
    assert_eq!(env.received_requests().await.len(), 1);
}

#[tokio::test]
async fn deleting_an_endpoint_fails_its_pending_retries() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(500).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o8").await;
    env.wait_for_attempts(delivery.id, 1).await.unwrap();

    env.ingress().delete_endpoint(env.owner(), endpoint.id).await.unwrap();

    let failed = env.delivery(delivery.id).await.unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some(ENDPOINT_DELETED));
    assert!(failed.next_retry_at.is_none());
}

#[tokio::test]
async fn pausing_an_endpoint_fails_its_due_retries_without_sending() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(500).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o9").await;
    env.wait_for_attempts(delivery.id, 1).await.unwrap();

    let pause = EndpointUpdate { is_active: Some(false), ..Default::default() };
    env.ingress().update_endpoint(env.owner(), endpoint.id, pause).await.unwrap();

    let report = env.fire_retry(delivery.id).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 0);

    let failed = env.delivery(delivery.id).await.unwrap();
    assert_eq!(failed.status, DeliveryStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some(ENDPOINT_INACTIVE));
    assert_eq!(failed.attempt_count, 1);
    assert_eq!(env.received_requests().await.len(), 1);

    // Paused endpoints receive no new deliveries either.
    let ids = env.enqueue(EventType::OrderCreated, json_payload("o10")).await.unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn manual_retry_requeues_only_failed_deliveries() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with_times(400, 1).await;
    env.respond_with(200).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o11").await;
    env.wait_for_status(delivery.id, DeliveryStatus::Failed).await.unwrap();

    let requeued = env.ingress().manual_retry(env.owner(), delivery.id).await.unwrap();
    assert_eq!(requeued.status, DeliveryStatus::Pending);
    assert_eq!(requeued.attempt_count, 1);
    assert_eq!(requeued.next_retry_at, Some(env.now()));

    let report = env.tick_scheduler().await.unwrap();
    assert_eq!(report.dispatched, 1);
    let done = env.wait_for_status(delivery.id, DeliveryStatus::Succeeded).await.unwrap();
    assert_eq!(done.attempt_count, 2);

    let err = env.ingress().manual_retry(env.owner(), delivery.id).await.unwrap_err();
    assert!(matches!(err, IngressError::NotRetryable { .. }));
}

#[tokio::test]
async fn enqueue_validates_event_type_and_payload_size() {
    let env = TestEnv::builder().max_payload_size(64).build().await.unwrap();
    env.respond_with(200).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();
    let ingress = env.ingress();

    let at_limit = Bytes::from(vec![b'a'; 64]);
    assert_eq!(ingress.enqueue("order.created", at_limit).await.unwrap().len(), 1);

    let over = Bytes::from(vec![b'a'; 65]);
    let err = ingress.enqueue("order.created", over).await.unwrap_err();
    assert!(matches!(err, IngressError::PayloadTooLarge { size: 65, max: 64 }));

    let err = ingress.enqueue("order.exploded", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, IngressError::UnknownEventType(_)));

    let err = ingress.enqueue("ping", Bytes::new()).await.unwrap_err();
    assert!(matches!(err, IngressError::UnknownEventType(_)));
}

#[tokio::test]
async fn enqueue_without_subscribers_creates_nothing() {
    let env = TestEnv::new().await.unwrap();
    env.create_endpoint(&[EventType::TipCreated]).await.unwrap();

    let ids = env.enqueue(EventType::OrderCreated, json_payload("o12")).await.unwrap();
    assert!(ids.is_empty());
    assert_eq!(env.store().delivery_count().await, 0);
}

#[tokio::test]
async fn fan_out_creates_one_delivery_per_subscriber() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    for _ in 0..3 {
        env.create_endpoint(&[EventType::PaymentSucceeded]).await.unwrap();
    }
    env.create_endpoint(&[EventType::TipCreated]).await.unwrap();

    let ids = env.enqueue(EventType::PaymentSucceeded, json_payload("p1")).await.unwrap();
    assert_eq!(ids.len(), 3);

    let mut event_ids = Vec::new();
    for id in &ids {
        let delivery = env.wait_for_status(*id, DeliveryStatus::Succeeded).await.unwrap();
        event_ids.push(delivery.event_id);
    }
    event_ids.dedup();
    assert_eq!(event_ids.len(), 1);
}

#[tokio::test]
async fn fresh_deliveries_are_reserved_from_the_scheduler() {
    let env = TestEnv::builder().without_workers().build().await.unwrap();
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o13").await;
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempt_count, 0);

    // Lease is twice the 2 s request timeout.
    assert_eq!(delivery.next_retry_at, Some(env.now() + chrono::Duration::seconds(4)));
    assert_eq!(env.tick_scheduler().await.unwrap().claimed, 0);

    // A crashed process never reports back; the reservation lapses.
    env.advance_time(Duration::from_secs(5));
    assert_eq!(env.tick_scheduler().await.unwrap().claimed, 1);
}

#[tokio::test]
async fn full_queue_defers_deliveries_to_the_scheduler() {
    let env = TestEnv::builder().without_workers().queue_size(1).build().await.unwrap();
    for _ in 0..3 {
        env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();
    }

    let now = env.now();
    let ids = env.enqueue(EventType::OrderCreated, json_payload("o14")).await.unwrap();
    assert_eq!(ids.len(), 3);

    let mut reserved = 0;
    let mut deferred = 0;
    for id in ids {
        let delivery = env.delivery(id).await.unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        match delivery.next_retry_at {
            Some(at) if at == now + chrono::Duration::seconds(4) => reserved += 1,
            Some(at) if at == now + chrono::Duration::seconds(5) => deferred += 1,
            other => panic!("unexpected next_retry_at {other:?}"),
        }
    }
    assert_eq!((reserved, deferred), (1, 2));
}

#[tokio::test]
async fn concurrent_ticks_never_claim_the_same_delivery() {
    let env = TestEnv::builder().without_workers().queue_size(64).build().await.unwrap();
    let endpoint = EndpointBuilder::new(env.hook_url()).build();
    let store = env.store();
    store.create_endpoint(&endpoint).await.unwrap();

    let due = env.now() - chrono::Duration::seconds(1);
    for i in 0..20 {
        let delivery = Delivery::new(
            endpoint.id,
            homechef_core::EventId::new(),
            EventType::OrderCreated,
            format!("{{\"n\":{i}}}").into_bytes(),
            due,
            due,
        );
        store.create_delivery(&delivery).await.unwrap();
    }

    let scheduler = env.engine().scheduler();
    let (a, b) = tokio::join!(scheduler.tick(), scheduler.tick());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.claimed + b.claimed, 20);
    assert_eq!(a.dispatched + b.dispatched, 20);
    assert_eq!(env.tick_scheduler().await.unwrap().claimed, 0);
}

#[tokio::test]
async fn shutdown_releases_unstarted_deliveries() {
    let mut env = TestEnv::builder().without_workers().build().await.unwrap();
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o15").await;
    let stopped_at = env.now();
    env.shutdown().await.unwrap();

    let released = env.delivery(delivery.id).await.unwrap();
    assert_eq!(released.status, DeliveryStatus::Pending);
    assert_eq!(released.next_retry_at, Some(stopped_at));
    assert_eq!(released.attempt_count, 0);
}

#[tokio::test]
async fn shutdown_releases_jobs_waiting_for_a_permit() {
    let mut env = TestEnv::builder().workers(2).max_in_flight(1).build().await.unwrap();
    env.respond_slowly(200, Duration::from_millis(800)).await;
    for _ in 0..2 {
        env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();
    }

    let ids = env.enqueue(EventType::OrderCreated, json_payload("o18")).await.unwrap();
    assert_eq!(ids.len(), 2);
    wait_for_in_flight(&env, 1).await;
    // Let the second worker take its job and block on the global permit.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped_at = env.now();
    env.shutdown().await.unwrap();

    let mut states = Vec::new();
    for id in ids {
        let delivery = env.delivery(id).await.unwrap();
        states.push((delivery.status, delivery.attempt_count, delivery.next_retry_at));
    }
    states.sort_by_key(|(_, attempts, _)| *attempts);
    assert_eq!(states[0], (DeliveryStatus::Pending, 0, Some(stopped_at)));
    assert_eq!(states[1], (DeliveryStatus::Succeeded, 1, None));
    assert_eq!(env.received_requests().await.len(), 1);
}

#[tokio::test]
async fn job_with_a_superseded_claim_sends_nothing() {
    let env = TestEnv::builder().without_workers().build().await.unwrap();
    env.respond_with(200).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o19").await;
    let reserved = delivery.claim().unwrap();

    // The reservation lapses and the scheduler takes the delivery over.
    env.advance_time(Duration::from_secs(5));
    assert_eq!(env.tick_scheduler().await.unwrap().dispatched, 1);
    let current = env.delivery(delivery.id).await.unwrap().claim().unwrap();
    assert_ne!(current, reserved);

    let dispatcher = env.engine().dispatcher();
    dispatcher.execute(DispatchJob { endpoint: endpoint.clone(), claim: reserved }).await;
    assert!(env.received_requests().await.is_empty());
    let untouched = env.delivery(delivery.id).await.unwrap();
    assert_eq!(untouched.status, DeliveryStatus::Delivering);
    assert_eq!(untouched.attempt_count, 0);

    dispatcher.execute(DispatchJob { endpoint: endpoint.clone(), claim: current }).await;
    let done = env.delivery(delivery.id).await.unwrap();
    assert_eq!(done.status, DeliveryStatus::Succeeded);
    assert_eq!(done.attempt_count, 1);

    // The same claim cannot start a second attempt.
    dispatcher.execute(DispatchJob { endpoint, claim: current }).await;
    assert_eq!(env.received_requests().await.len(), 1);
    assert_eq!(env.delivery(delivery.id).await.unwrap().attempt_count, 1);
}

#[tokio::test]
async fn busy_endpoint_does_not_hold_up_other_endpoints() {
    let env = TestEnv::builder().workers(2).build().await.unwrap();
    env.respond_with(200).await;
    env.respond_at("/slow", ResponseTemplate::new(200).set_delay(Duration::from_millis(1500)))
        .await;
    let capped = EndpointBuilder::new(env.mock_url("/slow"))
        .events(&[EventType::OrderCreated])
        .max_concurrency(1);
    env.create_endpoint_with(capped).await.unwrap();
    env.create_endpoint(&[EventType::TipCreated]).await.unwrap();

    let mut capped_ids = Vec::new();
    for n in 0..3 {
        let payload = json_payload(&format!("o2{n}"));
        capped_ids.extend(env.enqueue(EventType::OrderCreated, payload).await.unwrap());
    }
    let tip = env.enqueue(EventType::TipCreated, json_payload("t1")).await.unwrap();

    // Well inside the capped endpoint's response time.
    env.wait_for_delivery(tip[0], Duration::from_millis(1000), |d| {
        d.status == DeliveryStatus::Succeeded
    })
    .await
    .unwrap();

    let mut succeeded = 0;
    let mut deferred: Vec<DeliveryId> = Vec::new();
    for id in &capped_ids {
        let delivery = env
            .wait_for_delivery(*id, DEFAULT_WAIT, |d| d.status != DeliveryStatus::Delivering)
            .await
            .unwrap();
        match delivery.status {
            DeliveryStatus::Succeeded => succeeded += 1,
            DeliveryStatus::Pending => {
                assert_eq!(delivery.attempt_count, 0);
                assert_eq!(delivery.next_retry_at, Some(env.now() + chrono::Duration::seconds(1)));
                deferred.push(delivery.id);
            },
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!((succeeded, deferred.len()), (1, 2));
    assert_eq!(env.stats().await.deferred_deliveries, 2);

    env.advance_time(Duration::from_secs(1));
    assert_eq!(env.tick_scheduler().await.unwrap().claimed, 2);
}

#[tokio::test]
async fn interrupted_fan_out_still_dispatches_created_deliveries() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    for _ in 0..3 {
        env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();
    }
    env.store().set_delivery_capacity(Some(2));

    let err = env.ingress().enqueue("order.created", json_payload("o23")).await.unwrap_err();
    assert!(matches!(err, IngressError::StoreUnavailable(_)));

    let created = env
        .store()
        .list_deliveries(&DeliveryFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    for delivery in created {
        env.wait_for_status(delivery.id, DeliveryStatus::Succeeded).await.unwrap();
    }
    assert_eq!(env.received_requests().await.len(), 2);
}

#[tokio::test]
async fn enqueue_is_refused_after_shutdown_begins() {
    let env = TestEnv::new().await.unwrap();
    let ingress = env.ingress();
    ingress.close();

    let err = ingress.enqueue("order.created", json_payload("o16")).await.unwrap_err();
    assert!(matches!(err, IngressError::ShuttingDown));
}

#[tokio::test]
async fn test_webhook_sends_unpersisted_ping() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(204).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let result = env.ingress().test_webhook(env.owner(), endpoint.id).await.unwrap();
    assert!(result.success);
    assert_eq!(result.status_code, Some(204));

    let requests = env.received_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(header(&requests[0], "x-homechef-event"), "ping");
    assert!(signing::verify(
        header(&requests[0], "x-homechef-signature"),
        &requests[0].body,
        &endpoint.secret
    ));
    assert_eq!(env.store().delivery_count().await, 0);
}

#[tokio::test]
async fn test_webhook_reports_subscriber_failure() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(500).await;
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let result = env.ingress().test_webhook(env.owner(), endpoint.id).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.status_code, Some(500));
    assert!(result.error.is_some());
}

#[tokio::test]
async fn management_operations_are_owner_scoped() {
    let env = TestEnv::new().await.unwrap();
    let endpoint = env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();
    let stranger = homechef_core::OwnerId::new("someone-else");
    let ingress = env.ingress();

    let err = ingress.get_endpoint(&stranger, endpoint.id).await.unwrap_err();
    assert!(matches!(err, IngressError::NotFound(_)));
    let err = ingress.delete_endpoint(&stranger, endpoint.id).await.unwrap_err();
    assert!(matches!(err, IngressError::NotFound(_)));

    assert!(ingress.get_endpoint(env.owner(), endpoint.id).await.is_ok());
}

#[tokio::test]
async fn janitor_purges_only_old_terminal_deliveries() {
    let env = TestEnv::new().await.unwrap();
    env.respond_with(200).await;
    env.create_endpoint(&[EventType::OrderCreated]).await.unwrap();

    let delivery = single_delivery(&env, "o17").await;
    env.wait_for_status(delivery.id, DeliveryStatus::Succeeded).await.unwrap();

    env.advance_time(Duration::from_secs(29 * 86_400));
    assert_eq!(env.engine().janitor().sweep().await.unwrap(), 0);

    env.advance_time(Duration::from_secs(2 * 86_400));
    assert_eq!(env.engine().janitor().sweep().await.unwrap(), 1);
    assert_eq!(env.store().delivery_count().await, 0);
}
