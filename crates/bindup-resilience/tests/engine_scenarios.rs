//! End-to-end scenarios for the engine facade over the mock driver
//!
//! Each test drives a short BiNDup editor flow: resolve, act, verify,
//! with the popup suppressor running alongside.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use bindup_resilience::prelude::*;
use bindup_resilience::{phase, ResolutionStage, SuppressorState};
use std::sync::Arc;
use std::time::Duration;

fn engine(driver: MockDriver) -> (Engine<MockDriver>, Arc<MockDriver>, MemorySink) {
    let driver = Arc::new(driver);
    let sink = MemorySink::new();
    let config = EngineConfig::default()
        .with_candidate_timeout(200)
        .with_popup_interval(20);
    let engine = Engine::with_sink(Arc::clone(&driver), config, Arc::new(sink.clone()));
    (engine, driver, sink)
}

// ============================================================================
// Resolution
// ============================================================================

#[tokio::test]
async fn test_hidden_fallback_is_returned_and_force_clicked() {
    let (engine, driver, _) = engine(MockDriver::with_elements([
        MockElement::new("add-block", "button")
            .matching(".add-block-button")
            .hidden(),
    ]));

    let add = engine
        .resolve("Add Block Button", "text=ブロックを追加", &[".add-block-button"])
        .await
        .unwrap();
    assert_eq!(add.matched_candidate_index, 1);
    assert!(!add.visible);
    assert_eq!(add.stage, ResolutionStage::Fallback(0));

    engine.click(&add).await.unwrap();
    assert!(driver.was_called("force_click:add-block"));
}

#[tokio::test]
async fn test_unresolvable_element_reports_every_strategy() {
    let (engine, _, sink) = engine(MockDriver::new());

    let err = engine
        .resolve("Zyxwv Widget", "#zyxwv", &[".zyxwv"])
        .await
        .unwrap_err();
    match err {
        EngineError::NotFound {
            description,
            attempted,
        } => {
            assert_eq!(description, "Zyxwv Widget");
            assert!(attempted.len() >= 2 + 3);
            assert!(attempted[0].starts_with("primary"));
        }
        other => panic!("expected NotFound, got {other}"),
    }
    let last = sink.with_phase(phase::RESOLVE).pop().unwrap();
    assert_eq!(last.status, StepStatus::Error);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_flaky_operation_exhausts_budget() {
    let (engine, _, sink) = engine(MockDriver::new());

    let result: Result<(), _> = engine
        .execute_with_retry("publish site", Some(3), || async {
            Err(EngineError::operation("flaky"))
        })
        .await;
    let exhausted = result.unwrap_err();

    assert_eq!(exhausted.attempts.len(), 3);
    assert!(exhausted
        .attempts
        .iter()
        .all(|a| a.error_message.as_deref() == Some("flaky")));
    assert_eq!(exhausted.last_message(), "flaky");
    let statuses: Vec<_> = sink
        .with_phase(phase::RETRY)
        .iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Start,
            StepStatus::Warning,
            StepStatus::Warning,
            StepStatus::Error
        ]
    );

    let err: EngineError = exhausted.into();
    assert!(matches!(err, EngineError::RetryExhausted { attempts: 3, .. }));
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test]
async fn test_delete_then_verify_absent() {
    let (engine, driver, _) = engine(MockDriver::with_elements([
        MockElement::new("blk-7", "div").matching(".block"),
        MockElement::new("blk-8", "div").matching(".block"),
    ]));

    driver.remove_element("blk-7");
    let verdict = engine.verify(OperationKind::Delete, "blk-7").await;
    assert!(verdict.success);
    assert!(!verdict.target_exists);
    assert_eq!(verdict.element_count, 1);
}

#[tokio::test]
async fn test_duplicate_grows_block_count() {
    let (engine, driver, _) = engine(MockDriver::with_elements([
        MockElement::new("blk-1", "div").matching(".block"),
    ]));

    let before = engine.verify(OperationKind::Duplicate, "blk-1").await;
    assert!(!before.success);
    assert_eq!(before.element_count, 1);

    driver.add_element(MockElement::new("blk-1-copy", "div").matching(".block"));
    let after = engine.verify(OperationKind::Duplicate, "blk-1").await;
    assert!(after.success);
    assert_eq!(after.element_count, 2);
}

// ============================================================================
// Popup suppression
// ============================================================================

#[tokio::test]
async fn test_double_start_runs_one_loop() {
    let (engine, _, _) = engine(MockDriver::new());
    let popups = engine.popup_suppressor();

    assert!(popups.start());
    assert!(!popups.start());
    assert_eq!(popups.state(), SuppressorState::Monitoring);

    assert!(popups.stop().await);
    assert!(!popups.stop().await);
    assert_eq!(popups.state(), SuppressorState::Idle);
}

#[tokio::test]
async fn test_popup_dismissed_while_resolving() {
    let (engine, driver, sink) = engine(MockDriver::with_elements([
        MockElement::new("save", "button").with_text("保存"),
    ]));
    let popups = engine.popup_suppressor();
    popups.start();

    driver.add_element(MockElement::new("modal", "div").matching(".modal"));
    driver.add_element(
        MockElement::new("modal-close", "button")
            .matching(".modal .close")
            .removes_on_click("modal")
            .removes_on_click("modal-close"),
    );

    let save = engine
        .resolve_candidates("Save", SelectorCandidate::text("保存"), vec![])
        .await
        .unwrap();
    engine.click(&save).await.unwrap();

    let mut waited = Duration::ZERO;
    while driver.contains("modal") && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    popups.stop().await;

    assert!(!driver.contains("modal"));
    assert!(popups.dismissed_total() >= 1);
    assert!(sink
        .with_phase(phase::POPUP)
        .iter()
        .any(|e| e.status == StepStatus::Success && e.step == "generic-modal"));
}
