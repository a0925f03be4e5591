// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplicate-delivery tests

use super::*;
use pq_core::{PlanJob, PlanMetadata, PlanStepEntry, PlanStepSlot, TRACE_ID_HEADER};
use pq_queue::{EnqueueOptions, QueueAdapter};

/// Persist the world of a plan whose first step is queued, and enqueue its
/// job, as if a release happened and the process then stopped.
async fn seed_queued_step(ctx: &TestContext, plan_id: &str, step_id: &str) {
    let step = PlanStep::builder().id(step_id).build();
    let now = ctx.clock.epoch_ms();
    let entry = PlanStepEntry {
        plan_id: plan_id.into(),
        step_id: step.id.clone(),
        step: step.clone(),
        trace_id: "trace-1".into(),
        state: StepState::Queued,
        attempt: 0,
        created_at_ms: now,
        updated_at_ms: now,
        summary: None,
        output: None,
        approvals: Default::default(),
        subject: None,
    };
    ctx.store.remember_step(entry).await.unwrap();
    ctx.store
        .remember_plan_metadata(PlanMetadata {
            plan_id: plan_id.into(),
            trace_id: "trace-1".into(),
            steps: vec![PlanStepSlot { step: step.clone(), attempt: 0, created_at_ms: now, subject: None }],
            next_step_index: 1,
            last_completed_index: -1,
        })
        .await
        .unwrap();

    let job = PlanJob {
        plan_id: plan_id.into(),
        step,
        attempt: 0,
        created_at_ms: now,
        trace_id: "trace-1".into(),
        subject: None,
    };
    ctx.broker
        .enqueue(
            "plan.steps",
            serde_json::to_vec(&job).unwrap(),
            EnqueueOptions::with_key(job.idempotency_key()).header(TRACE_ID_HEADER, "trace-1"),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_duplicate_delivery_completes_once() {
    let ctx = setup_uninitialized(RuntimeConfig::default());
    seed_queued_step(&ctx, "p1", "a").await;
    // Inject a second delivery of the same (plan, step, attempt=0) message.
    assert!(ctx.broker.redeliver_copy("plan.steps", "p1:a"));

    ctx.runtime.initialize().await.unwrap();
    await_empty_store(&ctx).await;
    settle().await;

    // Exactly one running/completed pair; the duplicate was acked silently.
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"a".into()), 1);
    assert_eq!(ctx.runtime.metrics().completed, 1);
    assert_eq!(ctx.broker.queue_depth("plan.steps").await.unwrap(), 0);
}

#[tokio::test]
async fn replay_after_completion_is_dropped_by_the_metadata_gate() {
    let ctx = setup().await;
    let plan = plan_of("p1", &["a", "b"]);
    let mut events = ctx.runtime.subscribe(&plan.id);
    ctx.runtime.submit_plan(plan, "trace-1".into(), None).await.unwrap();
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
    await_empty_store(&ctx).await;

    // Replay step a long after its completion (idempotency key is free
    // again, so the enqueue is accepted as a fresh message).
    let job = PlanJob {
        plan_id: "p1".into(),
        step: PlanStep::builder().id("a").build(),
        attempt: 0,
        created_at_ms: ctx.clock.epoch_ms(),
        trace_id: "trace-1".into(),
        subject: None,
    };
    ctx.broker
        .enqueue(
            "plan.steps",
            serde_json::to_vec(&job).unwrap(),
            EnqueueOptions::with_key(job.idempotency_key()),
        )
        .await
        .unwrap();
    settle().await;

    // No re-execution, no extra terminal event.
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"a".into()), 1);
    assert_eq!(ctx.runtime.metrics().completed, 2);
}
