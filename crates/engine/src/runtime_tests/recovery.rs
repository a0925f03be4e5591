// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-recovery and rehydration tests

use super::*;
use pq_core::{ApprovalDecision, PlanJob, PlanMetadata, PlanStepEntry, PlanStepSlot};
use pq_queue::{EnqueueOptions, QueueAdapter};

/// Persist the world of a process that died mid-step: entry `running`,
/// metadata live, the job message still on the broker (redelivery).
async fn seed_crashed_running_step(ctx: &TestContext, plan_id: &str, step_id: &str) {
    let step = PlanStep::builder().id(step_id).build();
    let now = ctx.clock.epoch_ms();
    ctx.store
        .remember_step(PlanStepEntry {
            plan_id: plan_id.into(),
            step_id: step.id.clone(),
            step: step.clone(),
            trace_id: "trace-1".into(),
            state: StepState::Running,
            attempt: 0,
            created_at_ms: now,
            updated_at_ms: now,
            summary: None,
            output: None,
            approvals: Default::default(),
            subject: Some(subject()),
        })
        .await
        .unwrap();
    ctx.store
        .remember_plan_metadata(PlanMetadata {
            plan_id: plan_id.into(),
            trace_id: "trace-1".into(),
            steps: vec![PlanStepSlot {
                step: step.clone(),
                attempt: 0,
                created_at_ms: now,
                subject: Some(subject()),
            }],
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
        subject: Some(subject()),
    };
    ctx.broker
        .enqueue(
            "plan.steps",
            serde_json::to_vec(&job).unwrap(),
            EnqueueOptions::with_key(job.idempotency_key()),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn crashed_running_step_is_requeued_and_completes() {
    let ctx = setup_uninitialized(RuntimeConfig::default());
    seed_crashed_running_step(&ctx, "p1", "a").await;

    ctx.runtime.initialize().await.unwrap();

    // Rehydration reset the orphaned entry and republished its state.
    let replayed = ctx.runtime.latest_event(&"p1".into(), &"a".into());
    assert!(replayed.is_some());

    await_empty_store(&ctx).await;
    settle().await;
    assert_eq!(ctx.tools.call_count(&"p1".into(), &"a".into()), 1);
    assert_eq!(ctx.runtime.metrics().completed, 1);
}

#[tokio::test]
async fn rehydration_restores_subject_and_approvals() {
    let ctx = setup_uninitialized(RuntimeConfig::default());
    let step = PlanStep::builder()
        .id("b")
        .capability("mail.send")
        .approval_required(true)
        .build();
    let now = ctx.clock.epoch_ms();
    ctx.store
        .remember_step(PlanStepEntry {
            plan_id: "p1".into(),
            step_id: step.id.clone(),
            step: step.clone(),
            trace_id: "trace-1".into(),
            state: StepState::WaitingApproval,
            attempt: 0,
            created_at_ms: now,
            updated_at_ms: now,
            summary: None,
            output: None,
            approvals: Default::default(),
            subject: Some(subject()),
        })
        .await
        .unwrap();
    ctx.store
        .remember_plan_metadata(PlanMetadata {
            plan_id: "p1".into(),
            trace_id: "trace-1".into(),
            steps: vec![PlanStepSlot {
                step,
                attempt: 0,
                created_at_ms: now,
                subject: Some(subject()),
            }],
            next_step_index: 0,
            last_completed_index: -1,
        })
        .await
        .unwrap();

    ctx.runtime.initialize().await.unwrap();

    // Subject recovered into the live cache.
    let recovered = ctx.runtime.get_plan_subject(&"p1".into()).await.unwrap();
    assert_eq!(recovered.unwrap().user_id, "user-7");

    // The waiting gate survived the restart and still resolves.
    let mut events = ctx.runtime.subscribe(&"p1".into());
    ctx.runtime
        .resolve_approval(&"p1".into(), &"b".into(), ApprovalDecision::approved())
        .await
        .unwrap();
    // Replay first (waiting_approval republished during rehydration), then
    // the live approval flow.
    loop {
        let event = recv_event(&mut events).await;
        if event.state == StepState::Completed && event.step_id == "b" {
            break;
        }
    }
    await_empty_store(&ctx).await;
}

#[tokio::test]
async fn initialize_retries_after_broker_failure() {
    // A consumer registration conflict on the completion queue makes the
    // first attempt fail; releasing it lets the bounded retry succeed.
    let ctx = setup_uninitialized(
        RuntimeConfig::default().init_max_attempts(5).init_backoff_ms(100u64),
    );
    struct Sink;
    #[async_trait::async_trait]
    impl pq_queue::DeliveryHandler for Sink {
        async fn handle(&self, _delivery: pq_queue::Delivery) -> pq_queue::Disposition {
            pq_queue::Disposition::Ack
        }
    }
    let squatter = ctx
        .broker
        .consume("plan.completions", std::sync::Arc::new(Sink))
        .await
        .unwrap();

    let runtime = ctx.runtime.clone();
    let init = tokio::spawn(async move { runtime.initialize().await });
    // Let the first attempt fail (and its partial step-consumer be
    // reversed), then free the queue.
    settle().await;
    squatter.stop().await;

    init.await.unwrap().unwrap();
    ctx.runtime
        .submit_plan(plan_of("p1", &["a"]), "trace-1".into(), None)
        .await
        .unwrap();
    await_empty_store(&ctx).await;
}

#[tokio::test]
async fn initialize_gives_up_after_bounded_attempts() {
    let ctx = setup_uninitialized(RuntimeConfig::default().init_max_attempts(2));
    struct Sink;
    #[async_trait::async_trait]
    impl pq_queue::DeliveryHandler for Sink {
        async fn handle(&self, _delivery: pq_queue::Delivery) -> pq_queue::Disposition {
            pq_queue::Disposition::Ack
        }
    }
    // Occupy the step queue for the whole test.
    let _squatter = ctx
        .broker
        .consume("plan.steps", std::sync::Arc::new(Sink))
        .await
        .unwrap();

    let err = ctx.runtime.initialize().await.unwrap_err();
    assert!(matches!(err, crate::error::RuntimeError::Enqueue(_)));
}
