// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval gate specs

use crate::prelude::*;

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
async fn approval_round_trip() {
    let h = Harness::file().await;
    let plan = gated_plan("p1");
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    // After a completes, exactly one waiting_approval for b and no queued.
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
    settle().await;
    assert_eq!(
        h.runtime.latest_event(&"p1".into(), &"b".into()).unwrap().state,
        StepState::WaitingApproval
    );

    h.runtime
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
    h.await_drained().await;
}

#[tokio::test]
async fn rejecting_the_gate_halts_with_a_single_event() {
    let h = Harness::file().await;
    let plan = gated_plan("p1");
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime
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

    h.runtime
        .resolve_approval(&"p1".into(), &"b".into(), ApprovalDecision::rejected())
        .await
        .unwrap();

    let rejected = recv(&mut events).await;
    assert_eq!((rejected.step_id.as_str(), rejected.state), ("b", StepState::Rejected));

    // The subject remains resolvable, and no further event arrives.
    assert!(h.runtime.get_plan_subject(&"p1".into()).await.unwrap().is_some());
    h.await_drained().await;
    settle().await;
    assert_eq!(h.tools.call_count(&"p1".into(), &"b".into()), 0);
}

#[tokio::test]
async fn policy_deny_after_grant_surfaces_to_the_caller() {
    let h = Harness::file().await;
    let plan = gated_plan("p1");
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
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

    h.policy.deny_capability("mail.send", "capability disabled for tenant");
    let err = h
        .runtime
        .resolve_approval(&"p1".into(), &"b".into(), ApprovalDecision::approved())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::PolicyDenied(_)));

    let rejected = recv(&mut events).await;
    assert_eq!(rejected.state, StepState::Rejected);
    h.await_drained().await;
}

#[tokio::test]
async fn denied_first_step_never_releases_the_second() {
    let h = Harness::file().await;
    h.policy.deny_capability("test.capability", "blocked");
    let plan = plan_of("p1", &["a", "b"]);

    let err = h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap_err();
    assert!(matches!(err, RuntimeError::PolicyDenied(_)));

    h.await_drained().await;
    assert_eq!(h.broker.queue_depth("plan.steps").await.unwrap(), 0);
    assert!(h.tools.calls().is_empty());
}
