// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event dedup predicate tests

use super::*;
use crate::entry::PlanStepEntry;
use crate::plan::PlanStep;
use crate::state::StepState;

fn event(state: StepState, at: u64) -> PlanStepEvent {
    PlanStepEvent::for_step(
        "p1".into(),
        &PlanStep::builder().build(),
        state,
        0,
        "t1".into(),
        at,
    )
}

#[test]
fn identical_events_are_the_same_observation() {
    let a = event(StepState::Running, 100);
    let b = event(StepState::Running, 100);
    assert!(a.same_observation(&b));
}

#[test]
fn different_state_or_timestamp_is_a_new_observation() {
    let a = event(StepState::Running, 100);
    assert!(!a.same_observation(&event(StepState::Completed, 100)));
    assert!(!a.same_observation(&event(StepState::Running, 101)));
}

#[test]
fn summary_and_output_participate_in_dedup() {
    let a = event(StepState::Completed, 100).summary("done");
    let b = event(StepState::Completed, 100).summary("done");
    assert!(a.same_observation(&b));
    assert!(!a.same_observation(&event(StepState::Completed, 100).summary("other")));

    let with_output = event(StepState::Completed, 100).output(serde_json::json!({"n": 1}));
    let equal_output = event(StepState::Completed, 100).output(serde_json::json!({"n": 1}));
    // Structural equality, not reference identity.
    assert!(with_output.same_observation(&equal_output));
    assert!(!with_output
        .same_observation(&event(StepState::Completed, 100).output(serde_json::json!({"n": 2}))));
}

#[test]
fn for_entry_carries_approvals_and_summary() {
    let step = PlanStep::builder().capability("files.write").build();
    let entry = PlanStepEntry {
        plan_id: "p1".into(),
        step_id: step.id.clone(),
        step,
        trace_id: "t1".into(),
        state: StepState::Approved,
        attempt: 1,
        created_at_ms: 50,
        updated_at_ms: 60,
        summary: Some("granted".to_string()),
        output: None,
        approvals: [("files.write".to_string(), true)].into_iter().collect(),
        subject: None,
    };
    let ev = PlanStepEvent::for_entry(&entry, StepState::Approved, 200);
    assert_eq!(ev.attempt, 1);
    assert_eq!(ev.summary.as_deref(), Some("granted"));
    assert_eq!(
        ev.approvals,
        Some([("files.write".to_string(), true)].into_iter().collect())
    );
    assert_eq!(ev.occurred_at_ms, 200);
}
