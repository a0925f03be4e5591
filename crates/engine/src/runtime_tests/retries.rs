// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry and dead-letter tests

use super::*;
use pq_adapters::ToolEvent;

#[tokio::test]
async fn retryable_failures_requeue_then_succeed() {
    let ctx = setup().await;
    let plan = plan_of("p1", &["a"]);
    ctx.tools.script_retryable(&"p1".into(), &"a".into(), "connection reset");
    ctx.tools.script_retryable(&"p1".into(), &"a".into(), "connection reset");
    let mut events = ctx.runtime.subscribe(&plan.id);

    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Retrying, 0),
            ("a", StepState::Queued, 1),
            ("a", StepState::Running, 1),
            ("a", StepState::Retrying, 1),
            ("a", StepState::Queued, 2),
            ("a", StepState::Running, 2),
            ("a", StepState::Completed, 2),
        ],
    )
    .await;

    await_empty_store(&ctx).await;
    settle().await;
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"a".into()), 3);
    let metrics = ctx.runtime.metrics();
    assert_eq!(metrics.retried, 2);
    assert_eq!(metrics.completed, 1);
    assert!(ctx.broker.dead_letters("plan.steps").is_empty());
}

#[tokio::test]
async fn retries_exhausted_dead_letters_the_step() {
    let ctx = setup_with_config(RuntimeConfig::default().retry_max(2)).await;
    let plan = plan_of("p1", &["a"]);
    for _ in 0..3 {
        ctx.tools.script_retryable(&"p1".into(), &"a".into(), "no capacity");
    }
    let mut events = ctx.runtime.subscribe(&plan.id);

    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Retrying, 0),
            ("a", StepState::Queued, 1),
            ("a", StepState::Running, 1),
            ("a", StepState::Retrying, 1),
            ("a", StepState::Queued, 2),
            ("a", StepState::Running, 2),
            ("a", StepState::DeadLettered, 2),
        ],
    )
    .await;

    await_empty_store(&ctx).await;
    settle().await;
    let dead = ctx.broker.dead_letters("plan.steps");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, "Retries exhausted after 2 attempts: no capacity");
    assert_eq!(ctx.runtime.metrics().dead_lettered, 1);
}

#[tokio::test]
async fn terminal_tool_error_fails_the_step() {
    let ctx = setup().await;
    let plan = plan_of("p1", &["a", "b"]);
    ctx.tools.script_terminal(&"p1".into(), &"a".into(), "tool does not exist");
    let mut events = ctx.runtime.subscribe(&plan.id);

    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Failed, 0),
        ],
    )
    .await;
    let failed = ctx.runtime.latest_event(&"p1".into(), &"a".into()).unwrap();
    assert_eq!(failed.summary.as_deref(), Some("tool does not exist"));

    // Chain halts: step b never runs.
    await_empty_store(&ctx).await;
    settle().await;
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"b".into()), 0);
    assert_eq!(ctx.runtime.metrics().failed, 1);
}

#[tokio::test]
async fn tool_reported_terminal_failure_wins_over_default_completion() {
    // The last terminal event in the tool's response is authoritative.
    let ctx = setup().await;
    let plan = plan_of("p1", &["a"]);
    ctx.tools.script_events(
        &"p1".into(),
        &"a".into(),
        vec![
            ToolEvent { state: StepState::Running, summary: Some("working".into()), output: None },
            ToolEvent {
                state: StepState::Failed,
                summary: Some("ran out of budget".into()),
                output: None,
            },
        ],
    );
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            // republished tool events
            ("a", StepState::Running, 0),
            ("a", StepState::Failed, 0),
        ],
    )
    .await;
    await_empty_store(&ctx).await;
    settle().await;
    assert_eq!(ctx.runtime.metrics().failed, 1);
    assert_eq!(ctx.runtime.metrics().completed, 0);
}

#[tokio::test]
async fn tool_output_is_published_with_completion() {
    let ctx = setup().await;
    let plan = plan_of("p1", &["a"]);
    ctx.tools.script_events(
        &"p1".into(),
        &"a".into(),
        vec![ToolEvent::completed()
            .summary("fetched 3 documents")
            .output(serde_json::json!({"documents": 3}))],
    );
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[("a", StepState::Queued, 0), ("a", StepState::Running, 0)],
    )
    .await;
    let completed = recv_event(&mut events).await;
    assert_eq!(completed.state, StepState::Completed);
    assert_eq!(completed.summary.as_deref(), Some("fetched 3 documents"));
    assert_eq!(completed.output, Some(serde_json::json!({"documents": 3})));
}

#[tokio::test]
async fn content_capture_disabled_strips_published_output() {
    let ctx = setup_with_config(RuntimeConfig::default().capture_output(false)).await;
    let plan = plan_of("p1", &["a"]);
    ctx.tools.script_events(
        &"p1".into(),
        &"a".into(),
        vec![ToolEvent::completed().output(serde_json::json!({"secret": true}))],
    );
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[("a", StepState::Queued, 0), ("a", StepState::Running, 0)],
    )
    .await;
    let completed = recv_event(&mut events).await;
    assert_eq!(completed.state, StepState::Completed);
    assert!(completed.output.is_none());
}

#[tokio::test]
async fn step_timeout_budget_reaches_the_tool_call() {
    let ctx = setup().await;
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder().id("a").timeout_seconds(45).build()])
        .build();
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
        ],
    )
    .await;
    let calls = ctx.tools.calls();
    assert_eq!(calls[0].timeout, Duration::from_secs(45));
}
