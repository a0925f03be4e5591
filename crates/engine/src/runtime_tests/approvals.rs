// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval gate tests

use super::*;
use crate::error::RuntimeError;
use pq_adapters::AuditAction;
use pq_core::ApprovalDecision;

fn gated_plan(id: &str) -> Plan {
    Plan::builder()
        .id(id)
        .steps(vec![
            PlanStep::builder().id("a").build(),
            PlanStep::builder()
                .id("b")
                .capability("mail.send")
                .approval_required(true)
                .build(),
        ])
        .build()
}

#[tokio::test]
async fn approval_round_trip_approved() {
    let ctx = setup().await;
    let plan = gated_plan("p1");
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
            ("b", StepState::WaitingApproval, 0),
        ],
    )
    .await;

    ctx.runtime
        .resolve_approval(&"p1".into(), &"b".into(), ApprovalDecision::approved())
        .await
        .unwrap();

    expect_sequence(
        &mut events,
        &[
            ("b", StepState::Approved, 0),
            ("b", StepState::Queued, 0),
            ("b", StepState::Running, 0),
            ("b", StepState::Completed, 0),
        ],
    )
    .await;

    await_empty_store(&ctx).await;
    let granted: Vec<_> = ctx
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == AuditAction::ApprovalGranted)
        .collect();
    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].capability, "mail.send");
}

#[tokio::test]
async fn approved_event_carries_the_grant() {
    let ctx = setup().await;
    let plan = gated_plan("p1");
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
            ("b", StepState::WaitingApproval, 0),
        ],
    )
    .await;

    ctx.runtime
        .resolve_approval(
            &"p1".into(),
            &"b".into(),
            ApprovalDecision::approved_because("reviewed the draft"),
        )
        .await
        .unwrap();

    let approved = recv_event(&mut events).await;
    assert_eq!(approved.state, StepState::Approved);
    assert_eq!(approved.summary.as_deref(), Some("reviewed the draft"));
    assert_eq!(
        approved.approvals,
        Some([("mail.send".to_string(), true)].into_iter().collect())
    );
}

#[tokio::test]
async fn approval_rejected_halts_the_chain() {
    let ctx = setup().await;
    let plan = gated_plan("p1");
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
            ("b", StepState::WaitingApproval, 0),
        ],
    )
    .await;

    ctx.runtime
        .resolve_approval(
            &"p1".into(),
            &"b".into(),
            ApprovalDecision::rejected_because("not today"),
        )
        .await
        .unwrap();

    let rejected = recv_event(&mut events).await;
    assert_eq!(rejected.state, StepState::Rejected);
    assert_eq!(rejected.summary.as_deref(), Some("not today"));

    // Chain halted: no further events, nothing persisted, tool untouched.
    await_empty_store(&ctx).await;
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"b".into()), 0);

    // The subject survives into the retention window.
    let retained = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap();
    assert_eq!(retained.unwrap().user_id, "user-7");

    let rejections: Vec<_> = ctx
        .audit
        .records()
        .into_iter()
        .filter(|r| r.action == AuditAction::ApprovalRejected)
        .collect();
    assert_eq!(rejections.len(), 1);
}

#[tokio::test]
async fn approval_granted_but_policy_denies() {
    let ctx = setup().await;
    let plan = gated_plan("p1");
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
            ("b", StepState::WaitingApproval, 0),
        ],
    )
    .await;

    // Policy turned against the capability while the gate was open.
    ctx.policy.deny_capability("mail.send", "tenant suspended");

    let err = ctx
        .runtime
        .resolve_approval(&"p1".into(), &"b".into(), ApprovalDecision::approved())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::PolicyDenied(_)));

    let rejected = recv_event(&mut events).await;
    assert_eq!(rejected.state, StepState::Rejected);
    assert!(rejected.summary.unwrap().contains("tenant suspended"));
    await_empty_store(&ctx).await;
}

#[tokio::test]
async fn approval_for_unknown_step_is_unavailable() {
    let ctx = setup().await;
    let err = ctx
        .runtime
        .resolve_approval(&"ghost".into(), &"s".into(), ApprovalDecision::approved())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::StepUnavailable { .. }));
}

#[tokio::test]
async fn approval_for_completed_step_is_unavailable() {
    let ctx = setup().await;
    let plan = plan_of("p1", &["a"]);
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
    await_empty_store(&ctx).await;

    let err = ctx
        .runtime
        .resolve_approval(&"p1".into(), &"a".into(), ApprovalDecision::approved())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::StepUnavailable { .. }));
}

#[tokio::test]
async fn policy_gated_approval_releases_after_grant() {
    // The policy itself (not the step flag) gates the capability; the
    // `approval_required` deny reason parks the release rather than
    // rejecting the plan.
    let ctx = setup().await;
    ctx.policy.require_approval("test.capability");
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder().id("a").approval_required(true).build()])
        .build();
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    let waiting = recv_event(&mut events).await;
    assert_eq!(waiting.state, StepState::WaitingApproval);

    ctx.runtime
        .resolve_approval(&"p1".into(), &"a".into(), ApprovalDecision::approved())
        .await
        .unwrap();
    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Approved, 0),
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
        ],
    )
    .await;
    await_empty_store(&ctx).await;
}
