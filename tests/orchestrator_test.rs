//! Fan-out pipeline and circuit breaker behaviour

mod fixtures;
mod helpers;

use fixtures::*;
use helpers::*;
use pod_publish_engine::models::pipeline::{ProductType, PublishOutcome};
use pod_publish_engine::services::circuit_breaker::BreakerState;
use pod_publish_engine::services::orchestrator::{OrchestratorConfig, PipelineError, IMAGE_DEPENDENCY};
use std::sync::Mutex;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_failing_platform_does_not_affect_siblings() {
    let stack = TestStack::new(
        MockImages::default(),
        vec![
            MockPlatform::ok("alpha"),
            MockPlatform::failing("bravo"),
            MockPlatform::ok("charlie"),
        ],
    );
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let result = assert_ok!(orchestrator.run(&generation("koi", 2), |_| {}).await);

    assert_eq!(result.assets.len(), 2);
    assert_eq!(result.publishes.len(), 6);
    assert_eq!(result.successful_publishes(), 4);
    assert!(result.is_success());
    assert_eq!(stack.platform("alpha").calls(), 2);
    assert_eq!(stack.platform("charlie").calls(), 2);

    // One failure entry per failed (platform, asset) pair.
    assert_eq!(result.errors.len(), 2);
    for asset in &result.assets {
        let matching: Vec<_> = result
            .errors
            .iter()
            .filter(|e| e.starts_with("bravo/t_shirt") && e.contains(&asset.id))
            .collect();
        assert_eq!(matching.len(), 1, "errors: {:?}", result.errors);
    }
}

#[tokio::test]
async fn test_open_platform_breaker_skips_adapter() {
    let stack = TestStack::new(
        MockImages::default(),
        vec![MockPlatform::ok("alpha"), MockPlatform::failing("bravo")],
    );
    let orchestrator = stack.orchestrator(sensitive_breakers(2));

    let first = assert_ok!(orchestrator.run(&generation("tide", 2), |_| {}).await);
    assert_eq!(first.errors.len(), 2);
    assert_eq!(stack.platform("bravo").calls(), 2);
    assert_eq!(
        orchestrator.platform_breaker("bravo").unwrap().state(),
        BreakerState::Open
    );

    let second = assert_ok!(orchestrator.run(&generation("tide", 1), |_| {}).await);
    assert_eq!(stack.platform("bravo").calls(), 2, "open breaker must not call the adapter");
    assert_eq!(stack.platform("alpha").calls(), 3);
    let skipped = second
        .publishes
        .iter()
        .find(|p| p.platform == "bravo")
        .unwrap();
    assert_eq!(skipped.outcome, PublishOutcome::Failed);
    assert_eq!(skipped.error.as_deref(), Some("circuit open"));
    assert!(second.is_success());

    let stats = orchestrator.stats();
    let bravo = stats.dependencies.iter().find(|d| d.name == "bravo").unwrap();
    assert_eq!(bravo.state, BreakerState::Open);
    assert_eq!(bravo.failures, 2);
    assert_eq!(bravo.skipped, 1);
}

#[tokio::test]
async fn test_panicking_adapter_is_isolated() {
    let stack = TestStack::new(
        MockImages::default(),
        vec![MockPlatform::ok("alpha"), MockPlatform::panicking("bravo")],
    );
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let result = assert_ok!(orchestrator.run(&generation("glitch", 1), |_| {}).await);

    let bravo = result.publishes.iter().find(|p| p.platform == "bravo").unwrap();
    assert_eq!(bravo.outcome, PublishOutcome::Failed);
    assert_eq!(bravo.error.as_deref(), Some("adapter panicked"));
    assert_eq!(result.successful_publishes(), 1);
}

#[tokio::test]
async fn test_no_prompts_is_fatal() {
    let stack = TestStack::simple();
    stack.prompts.set_empty(true);
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let err = assert_err!(orchestrator.run(&generation("void", 3), |_| {}).await);
    assert!(matches!(err, PipelineError::NoPrompts));
    assert_eq!(stack.images.calls(), 0);
    assert_eq!(orchestrator.stats().fatal_runs, 1);
}

#[tokio::test]
async fn test_no_images_is_fatal() {
    let stack = TestStack::simple();
    stack.images.set_failing(true);
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let err = assert_err!(orchestrator.run(&generation("blank", 2), |_| {}).await);
    match err {
        PipelineError::NoImages { attempted, reason } => {
            assert_eq!(attempted, 2);
            assert!(reason.contains("GPU worker crashed"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stack.platform("shop").calls(), 0);
}

#[tokio::test]
async fn test_partial_image_failures_are_not_fatal() {
    let stack = TestStack::simple();
    stack.images.fail_next(1);
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let result = assert_ok!(orchestrator.run(&generation("half", 3), |_| {}).await);
    assert_eq!(result.assets.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].starts_with("image generation failed"));
}

#[tokio::test]
async fn test_open_image_breaker_fails_fast() {
    let stack = TestStack::simple();
    stack.images.set_failing(true);
    let orchestrator = stack.orchestrator(sensitive_breakers(1));

    assert_err!(orchestrator.run(&generation("first", 1), |_| {}).await);
    assert!(orchestrator.image_breaker().is_open());
    let calls = stack.images.calls();

    let err = assert_err!(orchestrator.run(&generation("second", 2), |_| {}).await);
    assert!(err.to_string().contains("circuit open"));
    assert_eq!(stack.images.calls(), calls);

    let stats = orchestrator.stats();
    let image = stats
        .dependencies
        .iter()
        .find(|d| d.name == IMAGE_DEPENDENCY)
        .unwrap();
    assert_eq!(image.skipped, 2);
}

#[tokio::test]
async fn test_image_generation_window_is_bounded() {
    let stack = TestStack::new(
        MockImages::with_delay(Duration::from_millis(20)),
        vec![MockPlatform::ok("shop")],
    );
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let result = assert_ok!(orchestrator.run(&generation("crowd", 10), |_| {}).await);
    assert_eq!(result.assets.len(), 10);
    assert_eq!(stack.images.calls(), 10);
    assert!(stack.images.max_in_flight() <= 3);
    assert!(stack.images.max_in_flight() > 1);
}

#[tokio::test]
async fn test_duplicate_designs_publish_once() {
    let stack = TestStack::new(MockImages::identical(), vec![MockPlatform::ok("shop")]);
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let result = assert_ok!(orchestrator.run(&generation("echo", 3), |_| {}).await);
    assert_eq!(result.assets.len(), 1);
    assert_eq!(stack.assets.len(), 1);
    assert_eq!(stack.platform("shop").calls(), 1);
}

#[tokio::test]
async fn test_platform_selection_and_capabilities() {
    let stack = TestStack::new(
        MockImages::default(),
        vec![
            MockPlatform::ok("alpha").supporting(vec![ProductType::Poster]),
            MockPlatform::ok("bravo"),
            MockPlatform::ok("charlie"),
        ],
    );
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let mut request = with_products(
        generation("picky", 1),
        vec![ProductType::TShirt, ProductType::Poster],
    );
    request.platforms = Some(vec!["alpha".to_string(), "bravo".to_string(), "zeta".to_string()]);

    let result = assert_ok!(orchestrator.run(&request, |_| {}).await);

    assert_eq!(stack.platform("alpha").calls(), 1);
    assert_eq!(stack.platform("alpha").listings()[0].product_type, ProductType::Poster);
    assert_eq!(stack.platform("bravo").calls(), 2);
    assert_eq!(stack.platform("charlie").calls(), 0);
    assert_eq!(result.publishes.len(), 3);
    assert_eq!(result.errors, vec!["platform 'zeta' is not registered".to_string()]);
}

#[tokio::test]
async fn test_publish_step_and_pricing() {
    let stack = TestStack::new(
        MockImages::default(),
        vec![MockPlatform::ok("alpha").publishing(), MockPlatform::ok("bravo")],
    );
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());

    let request = with_products(generation("price", 1), vec![ProductType::Mug]);
    let result = assert_ok!(orchestrator.run(&request, |_| {}).await);

    let outcome = |platform: &str| {
        result
            .publishes
            .iter()
            .find(|p| p.platform == platform)
            .map(|p| p.outcome)
    };
    assert_eq!(outcome("alpha"), Some(PublishOutcome::Published));
    assert_eq!(outcome("bravo"), Some(PublishOutcome::Created));
    assert_eq!(stack.platform("alpha").publish_calls(), 1);
    assert_eq!(stack.platform("bravo").listings()[0].price, ProductType::Mug.default_price());

    let mut manual = with_products(generation("price", 1), vec![ProductType::Mug]);
    manual.auto_publish = false;
    manual.price = Some(9.5);
    let result = assert_ok!(orchestrator.run(&manual, |_| {}).await);
    assert!(result.publishes.iter().all(|p| p.outcome == PublishOutcome::Created));
    assert_eq!(stack.platform("alpha").publish_calls(), 1);
    assert_eq!(stack.platform("alpha").listings()[1].price, 9.5);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let stack = TestStack::simple();
    let orchestrator = stack.orchestrator(OrchestratorConfig::default());
    let seen = Mutex::new(Vec::new());

    assert_ok!(
        orchestrator
            .run(&generation("steps", 4), |p| seen.lock().unwrap().push(p))
            .await
    );

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.first(), Some(&10));
    assert_eq!(seen.last(), Some(&70));
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_cancelled_image_probe_reopens_breaker() {
    let stack = TestStack::simple();
    let orchestrator = stack.orchestrator(twitchy_breakers());

    stack.images.fail_next(1);
    assert_err!(orchestrator.run(&generation("first", 1), |_| {}).await);
    assert!(orchestrator.image_breaker().is_open());
    tokio::time::sleep(Duration::from_millis(20)).await;

    stack.images.stall_next(1);
    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.run(&generation("probe", 1), |_| {}),
    )
    .await;
    assert!(cancelled.is_err(), "stalled call should have timed out");
    assert_eq!(orchestrator.image_breaker().state(), BreakerState::Open);
    assert_eq!(stack.images.calls(), 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let result = assert_ok!(orchestrator.run(&generation("later", 1), |_| {}).await);
    assert_eq!(result.assets.len(), 1);
    assert_eq!(stack.images.calls(), 3);
    assert_eq!(orchestrator.image_breaker().state(), BreakerState::Closed);
}

#[tokio::test]
async fn test_panicking_image_backend_counts_as_failure() {
    let stack = TestStack::simple();
    let orchestrator = stack.orchestrator(twitchy_breakers());

    stack.images.fail_next(1);
    assert_err!(orchestrator.run(&generation("first", 1), |_| {}).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    stack.images.panic_next(1);
    let err = assert_err!(orchestrator.run(&generation("probe", 1), |_| {}).await);
    assert!(err.to_string().contains("image backend panicked"));
    assert_eq!(orchestrator.image_breaker().state(), BreakerState::Open);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_ok!(orchestrator.run(&generation("later", 1), |_| {}).await);
    assert_eq!(stack.images.calls(), 3);
    assert_eq!(orchestrator.image_breaker().state(), BreakerState::Closed);
}
