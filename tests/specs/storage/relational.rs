// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end runs over the relational backend.
//!
//! The runtime is backend-agnostic; these specs re-run the core scenarios
//! against SQLite to keep both `PlanStateStore` implementations honest.

use crate::prelude::*;

#[tokio::test]
async fn happy_path_on_sqlite() {
    let h = Harness::relational().await;
    let plan = plan_of("p1", &["a", "b"]);
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
            ("b", StepState::Queued, 0),
            ("b", StepState::Running, 0),
            ("b", StepState::Completed, 0),
        ],
    )
    .await;
    h.await_drained().await;
}

#[tokio::test]
async fn approval_round_trip_on_sqlite() {
    let h = Harness::relational().await;
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder()
            .id("a")
            .capability("mail.send")
            .approval_required(true)
            .build()])
        .build();
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime
        .submit_plan(plan, "trace-1".into(), Some(subject()))
        .await
        .unwrap();

    expect_sequence(&mut events, &[("a", StepState::WaitingApproval, 0)]).await;

    // The grant lands in the relational row before release re-runs.
    h.runtime
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
    h.await_drained().await;
}

#[tokio::test]
async fn retries_on_sqlite() {
    let h = Harness::relational().await;
    h.tools.script_retryable(&"p1".into(), &"a".into(), "transient");
    let mut events = h.runtime.subscribe(&"p1".into());
    h.runtime
        .submit_plan(plan_of("p1", &["a"]), "trace-1".into(), None)
        .await
        .unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Retrying, 0),
            ("a", StepState::Queued, 1),
            ("a", StepState::Running, 1),
            ("a", StepState::Completed, 1),
        ],
    )
    .await;
    h.await_drained().await;
}
