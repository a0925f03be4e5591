// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event stream, subject retention, and metrics specs

use crate::prelude::*;
use serial_test::serial;

#[tokio::test]
async fn late_subscriber_replays_retained_history() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a"]);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
    h.await_drained().await;
    settle().await;

    // Subscribe after the fact: history replays oldest-first.
    let mut events = h.runtime.subscribe(&"p1".into());
    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
        ],
    )
    .await;
}

#[tokio::test]
async fn history_expires_after_the_retention_window() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a"]);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
    h.await_drained().await;
    settle().await;

    h.clock.advance(Duration::from_millis(
        RuntimeConfig::default().history_retention_ms + 1,
    ));
    assert!(h.runtime.latest_event(&"p1".into(), &"a".into()).is_none());
}

#[tokio::test]
async fn subject_lifecycle_live_retained_expired() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a"]);
    h.runtime
        .submit_plan(plan, "trace-1".into(), Some(subject()))
        .await
        .unwrap();
    h.await_drained().await;
    settle().await;

    // Retained after the last step terminated…
    let retained = h.runtime.get_plan_subject(&"p1".into()).await.unwrap();
    assert_eq!(retained.unwrap().user_id, "user-7");

    // …and gone after the window.
    h.clock.advance(Duration::from_millis(
        RuntimeConfig::default().history_retention_ms + 1,
    ));
    assert!(h.runtime.get_plan_subject(&"p1".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn metrics_tally_the_run() {
    let h = Harness::file_with(RuntimeConfig::default().retry_max(1)).await;
    h.tools.script_retryable(&"p1".into(), &"a".into(), "hiccup");
    h.runtime
        .submit_plan(plan_of("p1", &["a"]), "trace-1".into(), None)
        .await
        .unwrap();
    h.await_drained().await;
    settle().await;

    let metrics = h.runtime.metrics();
    assert_eq!(metrics.retried, 1);
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.step_queue_depth, 0);
}

#[tokio::test]
async fn audit_trail_records_denies_and_approvals() {
    let h = Harness::file().await;
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder()
            .id("a")
            .capability("files.write")
            .approval_required(true)
            .build()])
        .build();
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
    h.runtime
        .resolve_approval(&"p1".into(), &"a".into(), ApprovalDecision::approved())
        .await
        .unwrap();
    h.await_drained().await;

    let records = h.audit.records();
    assert!(records
        .iter()
        .any(|r| r.action == pq_adapters::AuditAction::ApprovalGranted
            && r.capability == "files.write"));
}

#[tokio::test]
#[serial]
async fn runtime_reads_recognized_environment_keys() {
    std::env::set_var("QUEUE_RETRY_MAX", "1");
    let config = RuntimeConfig::from_env();
    std::env::remove_var("QUEUE_RETRY_MAX");

    let h = Harness::file_with(config).await;
    h.tools.script_retryable(&"p1".into(), &"a".into(), "hiccup");
    h.tools.script_retryable(&"p1".into(), &"a".into(), "hiccup");
    h.runtime
        .submit_plan(plan_of("p1", &["a"]), "trace-1".into(), None)
        .await
        .unwrap();
    h.await_drained().await;
    settle().await;

    // retry_max=1: one retry, then the second failure dead-letters.
    assert_eq!(h.broker.dead_letters("plan.steps").len(), 1);
}
