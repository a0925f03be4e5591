// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry and dead-letter specs

use crate::prelude::*;

#[tokio::test]
async fn retry_twice_then_succeed() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a"]);
    h.tools.script_retryable(&"p1".into(), &"a".into(), "transient");
    h.tools.script_retryable(&"p1".into(), &"a".into(), "transient");
    let mut events = h.runtime.subscribe(&plan.id);

    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

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
    h.await_drained().await;
}

#[tokio::test]
async fn retries_exhausted_dead_letters_with_reason() {
    let h = Harness::file_with(RuntimeConfig::default().retry_max(2)).await;
    let plan = plan_of("p1", &["a"]);
    for _ in 0..3 {
        h.tools.script_retryable(&"p1".into(), &"a".into(), "still broken");
    }
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    // Drain until the terminal event.
    loop {
        let event = recv(&mut events).await;
        if event.state == StepState::DeadLettered {
            assert_eq!(event.attempt, 2);
            break;
        }
        assert!(!event.state.is_terminal(), "unexpected terminal {event:?}");
    }

    h.await_drained().await;
    settle().await;
    let dead = h.broker.dead_letters("plan.steps");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, "Retries exhausted after 2 attempts: still broken");
}

#[tokio::test]
async fn terminal_tool_error_fails_and_halts() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a", "b"]);
    h.tools.script_terminal(&"p1".into(), &"a".into(), "unknown tool");
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    expect_sequence(
        &mut events,
        &[
            ("a", StepState::Queued, 0),
            ("a", StepState::Running, 0),
            ("a", StepState::Failed, 0),
        ],
    )
    .await;
    h.await_drained().await;
    settle().await;
    assert_eq!(h.tools.call_count(&"p1".into(), &"b".into()), 0);
}

#[tokio::test]
async fn exactly_one_terminal_event_per_step() {
    let h = Harness::file().await;
    let plan = plan_of("p1", &["a", "b"]);
    let mut events = h.runtime.subscribe(&plan.id);
    h.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();

    let mut terminals: Vec<(String, StepState)> = Vec::new();
    while terminals.len() < 2 {
        let event = recv(&mut events).await;
        if event.state.is_terminal() {
            terminals.push((event.step_id.to_string(), event.state));
        }
    }
    assert_eq!(
        terminals,
        vec![
            ("a".to_string(), StepState::Completed),
            ("b".to_string(), StepState::Completed)
        ]
    );

    // Quiescence: no further terminal events show up.
    h.await_drained().await;
    settle().await;
    let history_a = h.runtime.latest_event(&"p1".into(), &"a".into()).unwrap();
    assert_eq!(history_a.state, StepState::Completed);
}
