// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subject retention tests

use super::*;

#[tokio::test]
async fn subject_is_available_while_the_plan_runs() {
    let ctx = setup().await;
    // An approval gate keeps the plan live.
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder().id("a").approval_required(true).build()])
        .build();
    ctx.runtime
        .submit_plan(plan, "trace-1".into(), Some(subject()))
        .await
        .unwrap();

    let live = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap().unwrap();
    assert_eq!(live.user_id, "user-7");
    assert!(live.has_role("operator"));
}

#[tokio::test]
async fn returned_subject_is_a_clone() {
    let ctx = setup().await;
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder().id("a").approval_required(true).build()])
        .build();
    ctx.runtime
        .submit_plan(plan, "trace-1".into(), Some(subject()))
        .await
        .unwrap();

    let mut first = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap().unwrap();
    first.roles.insert("intruder".to_string());
    let second = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap().unwrap();
    assert!(!second.has_role("intruder"));
}

#[tokio::test]
async fn subject_is_retained_for_the_window_after_completion() {
    let ctx = setup().await;
    let plan = plan_of("p1", &["a"]);
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime
        .submit_plan(plan, "trace-1".into(), Some(subject()))
        .await
        .unwrap();
    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
        ],
    )
    .await;
    await_empty_store(&ctx).await;
    settle().await;

    // (b) within the window: retained copy answers.
    let retained = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap();
    assert_eq!(retained.unwrap().user_id, "user-7");

    // (c) after the window: gone.
    ctx.clock.advance(Duration::from_millis(
        RuntimeConfig::default().history_retention_ms + 1,
    ));
    let expired = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap();
    assert!(expired.is_none());
}

#[tokio::test]
async fn unknown_plan_has_no_subject() {
    let ctx = setup().await;
    assert!(ctx.runtime.get_plan_subject(&"ghost".into()).await.unwrap().is_none());
}

#[tokio::test]
async fn submitting_without_subject_clears_any_prior_one() {
    let ctx = setup().await;
    let gated = |id: &str| {
        Plan::builder()
            .id(id)
            .steps(vec![PlanStep::builder().id("a").approval_required(true).build()])
            .build()
    };
    ctx.runtime
        .submit_plan(gated("p1"), "trace-1".into(), Some(subject()))
        .await
        .unwrap();
    // Same tenant resubmits a different plan without a subject; the first
    // plan keeps its own.
    ctx.runtime
        .submit_plan(gated("p2"), "trace-2".into(), None)
        .await
        .unwrap();

    assert!(ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap().is_some());
    assert!(ctx.runtime.get_plan_subject(&"p2".into()).await.unwrap().is_none());
}
