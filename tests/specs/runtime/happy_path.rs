// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequential execution specs
//!
//! A plan's steps run strictly in declaration order, one at a time; two
//! independent plans proceed without coordinating.

use crate::prelude::*;

#[tokio::test]
async fn two_step_plan_completes_in_order() {
    let h = Harness::file().await;
    let plan = plan_of("deploy-42", &["build", "release"]);
    let mut events = h.runtime.subscribe(&plan.id);

    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("build", StepState::Queued, 0),
            ("build", StepState::Running, 0),
            ("build", StepState::Completed, 0),
            ("release", StepState::Queued, 0),
            ("release", StepState::Running, 0),
            ("release", StepState::Completed, 0),
        ],
    )
    .await;

    // Final state-store contents: no entries, no metadata.
    h.await_drained().await;
    assert_eq!(h.broker.queue_depth("plan.steps").await.unwrap(), 0);
}

#[tokio::test]
async fn no_two_steps_of_a_plan_are_active_at_once() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a", "b", "c"]);
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    // Track per-step active states across the whole event sequence.
    let mut active: std::collections::HashSet<String> = Default::default();
    let mut completed = 0;
    while completed < 3 {
        let event = recv(&mut events).await;
        match event.state {
            StepState::Queued | StepState::Running | StepState::Retrying => {
                active.insert(event.step_id.to_string());
            }
            _ => {
                active.remove(event.step_id.as_str());
            }
        }
        assert!(
            active.len() <= 1,
            "two steps active simultaneously: {active:?}"
        );
        if event.state == StepState::Completed {
            completed += 1;
        }
    }
}

#[tokio::test]
async fn plans_progress_independently() {
    let h = Harness::file().await;
    let first = plan_of("p1", &["a"]);
    let second = plan_of("p2", &["a"]);
    let mut first_events = h.runtime.subscribe(&first.id);
    let mut second_events = h.runtime.subscribe(&second.id);

    h.runtime.submit_plan(first, "trace-1".into(), None).await.unwrap();
    h.runtime.submit_plan(second, "trace-2".into(), None).await.unwrap();

    expect_sequence(
        &mut first_events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
        ],
    )
    .await;
    expect_sequence(
        &mut second_events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Completed, 0),
        ],
    )
    .await;
    h.await_drained().await;
}

#[tokio::test]
async fn resubmitting_a_live_plan_is_rejected() {
    let h = Harness::file().await;
    let plan = Plan::builder()
        .id("p1")
        .steps(vec![PlanStep::builder().id("a").approval_required(true).build()])
        .build();
    h.runtime.submit_plan(plan.clone(), "trace-1".into(), None).await.unwrap();

    let err = h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap_err();
    assert!(matches!(err, RuntimeError::PlanExists(_)));

    // No duplicate entries appeared.
    assert_eq!(h.store.list_active_steps().await.unwrap().len(), 1);
}
