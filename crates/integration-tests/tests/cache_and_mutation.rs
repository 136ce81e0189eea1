//! Cached reads and optimistic writes against a mock backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use autopro_client::auth::MemoryStorage;
use autopro_client::mutation::{MutationMethod, MutationStatus};
use autopro_client::{ApiError, ApiErrorKind, ClientConfig, ClientState};
use autopro_integration_tests::{TestContext, closed_port_url};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const TTL: Duration = Duration::from_millis(1000);

async fn cached_cars(ctx: &TestContext) -> Result<Value, ApiError> {
    let api = ctx.state.api();
    ctx.state
        .cache()
        .get("cars_list", TTL, || api.get::<Value>("/cars"))
        .await
}

#[tokio::test]
async fn test_cached_get_hits_backend_once_per_ttl() {
    let ctx = TestContext::new().await;
    Mock::given(method("GET"))
        .and(path("/cars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "1"}])))
        .expect(2)
        .mount(&ctx.server)
        .await;

    cached_cars(&ctx).await.expect("first");
    ctx.clock.advance(Duration::from_millis(500));
    cached_cars(&ctx).await.expect("cached");

    ctx.clock.advance(Duration::from_millis(500));
    cached_cars(&ctx).await.expect("expired");
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let ctx = TestContext::new().await;
    Mock::given(method("GET"))
        .and(path("/cars"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&ctx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&ctx.server)
        .await;

    let err = cached_cars(&ctx).await.expect_err("first call fails");
    assert_eq!(err.kind(), ApiErrorKind::Server);
    assert!(!ctx.state.cache().contains("cars_list").await);

    assert_eq!(cached_cars(&ctx).await.expect("second call"), json!([]));
}

#[tokio::test]
async fn test_mutation_retries_network_errors_four_times() {
    let mut config = ClientConfig::new(closed_port_url());
    config.retry_delay = Duration::from_millis(1);
    config.audit_forward = false;
    let state = ClientState::new(config, Arc::new(MemoryStorage::new()));

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    state
        .api()
        .register_error_handler(ApiErrorKind::Network, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .forget();

    let mutation = state.mutation(
        state.mutation_options::<Value, Value>("/orders", MutationMethod::Post),
    );

    assert_eq!(mutation.mutate(json!({"carId": "1"})).await, None);
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(mutation.status(), MutationStatus::Error);
}

#[tokio::test]
async fn test_mutation_validation_error_single_attempt() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "dates overlap"})))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let mutation = ctx.state.mutation(
        ctx.state
            .mutation_options::<Value, Value>("/orders", MutationMethod::Post),
    );

    assert_eq!(mutation.mutate(json!({"carId": "1"})).await, None);
    let error = mutation.error().expect("error recorded");
    assert_eq!(error.kind(), ApiErrorKind::Validation);
    assert_eq!(error.message(), "dates overlap");
}

#[tokio::test]
async fn test_successful_mutation_evicts_cached_list() {
    let ctx = TestContext::new().await;
    Mock::given(method("GET"))
        .and(path("/cars"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "1"}])))
        .expect(2)
        .mount(&ctx.server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/cars/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "price": 4200})))
        .expect(1)
        .mount(&ctx.server)
        .await;

    cached_cars(&ctx).await.expect("warm");

    let optimistic = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&optimistic);
    let mutation = ctx.state.mutation(
        ctx.state
            .mutation_options::<Value, Value>("/cars/1", MutationMethod::Patch)
            .cache_prefix("cars_")
            .on_optimistic_update(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    );

    let updated = mutation.mutate(json!({"price": 4200})).await;

    assert_eq!(updated, Some(json!({"id": "1", "price": 4200})));
    assert_eq!(optimistic.load(Ordering::SeqCst), 1);
    assert!(!ctx.state.cache().contains("cars_list").await);

    cached_cars(&ctx).await.expect("refetched after eviction");
}
