// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion-queue reconciliation tests

use super::*;
use pq_core::StepCompletion;
use pq_queue::{EnqueueOptions, QueueAdapter};

async fn report(ctx: &TestContext, completion: &StepCompletion) {
    ctx.broker
        .enqueue(
            "plan.completions",
            serde_json::to_vec(completion).unwrap(),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();
}

/// Submit a plan whose first step parks behind an approval gate, so an
/// external worker can be the one to finish it.
async fn submit_gated(ctx: &TestContext, plan_id: &str) {
    let plan = Plan::builder()
        .id(plan_id)
        .steps(vec![
            PlanStep::builder()
                .id("a")
                .capability("external.work")
                .approval_required(true)
                .build(),
            PlanStep::builder().id("b").build(),
        ])
        .build();
    ctx.runtime
        .submit_plan(plan, "trace-1".into(), Some(subject()))
        .await
        .unwrap();
}

#[tokio::test]
async fn external_completion_advances_the_plan() {
    let ctx = setup().await;
    let mut events = ctx.runtime.subscribe(&"p1".into());
    submit_gated(&ctx, "p1").await;
    expect_sequence(&mut events, &[("a", StepState::WaitingApproval, 0)]).await;

    report(
        &ctx,
        &StepCompletion {
            plan_id: "p1".into(),
            step_id: "a".into(),
            state: StepState::Completed,
            summary: Some("done offline".to_string()),
            output: None,
            attempt: 0,
        },
    )
    .await;

    // The external completion is published with the step descriptor merged
    // back in, then step b runs in-process.
    let completed = recv_event(&mut events).await;
    assert_eq!(completed.step_id, "a");
    assert_eq!(completed.state, StepState::Completed);
    assert_eq!(completed.capability, "external.work");
    assert_eq!(completed.summary.as_deref(), Some("done offline"));

    expect_sequence(
        &mut events,
        &[
            ("b", StepState::Queued, 0),
            ("b", StepState::Running, 0),
            ("b", StepState::Completed, 0),
        ],
    )
    .await;
    await_empty_store(&ctx).await;
    // Step a was finished externally; no tool call for it.
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"a".into()), 0);
}

#[tokio::test]
async fn external_failure_halts_the_chain() {
    let ctx = setup().await;
    let mut events = ctx.runtime.subscribe(&"p1".into());
    submit_gated(&ctx, "p1").await;
    expect_sequence(&mut events, &[("a", StepState::WaitingApproval, 0)]).await;

    report(
        &ctx,
        &StepCompletion {
            plan_id: "p1".into(),
            step_id: "a".into(),
            state: StepState::Failed,
            summary: Some("worker exploded".to_string()),
            output: None,
            attempt: 0,
        },
    )
    .await;

    let failed = recv_event(&mut events).await;
    assert_eq!(failed.state, StepState::Failed);
    await_empty_store(&ctx).await;
    settle().await;

    // Chain halted; step b never released; subject retained.
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"b".into()), 0);
    assert_eq!(ctx.runtime.metrics().failed, 1);
    assert!(ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap().is_some());
}

#[tokio::test]
async fn completion_for_unknown_step_is_acked() {
    let ctx = setup().await;
    report(
        &ctx,
        &StepCompletion {
            plan_id: "ghost".into(),
            step_id: "s".into(),
            state: StepState::Completed,
            summary: None,
            output: None,
            attempt: 0,
        },
    )
    .await;
    settle().await;

    // Nothing persisted, nothing dead-lettered.
    assert!(ctx.store.list_active_steps().await.unwrap().is_empty());
    assert!(ctx.broker.dead_letters("plan.completions").is_empty());
}

#[tokio::test]
async fn non_terminal_completion_updates_without_retiring() {
    let ctx = setup().await;
    let mut events = ctx.runtime.subscribe(&"p1".into());
    submit_gated(&ctx, "p1").await;
    expect_sequence(&mut events, &[("a", StepState::WaitingApproval, 0)]).await;

    report(
        &ctx,
        &StepCompletion {
            plan_id: "p1".into(),
            step_id: "a".into(),
            state: StepState::Running,
            summary: Some("worker picked it up".to_string()),
            output: None,
            attempt: 1,
        },
    )
    .await;

    let running = recv_event(&mut events).await;
    assert_eq!(running.state, StepState::Running);
    assert_eq!(running.attempt, 1);

    // Entry still live, carrying the reported state.
    let entry = ctx
        .store
        .get_entry(&"p1".into(), &"a".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.state, StepState::Running);
    assert_eq!(entry.attempt, 1);
    assert_eq!(entry.summary.as_deref(), Some("worker picked it up"));
}
