// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crash-recovery specs
//!
//! A "crash" is modeled as a runtime that stops consuming while its state
//! store and broker keep their contents; a fresh runtime over the same
//! store and broker must pick the work back up without double-executing.

use crate::prelude::*;
use pq_core::{PlanJob, PlanMetadata, PlanStepEntry, PlanStepSlot};

/// Write the durable world of a process that died mid-`running` and leave
/// the step message on the broker for redelivery.
async fn seed_crashed_world(store: &Arc<dyn PlanStateStore>, broker: &MemoryBroker) {
    let step = PlanStep::builder().id("a").build();
    let entry = PlanStepEntry {
        plan_id: "p1".into(),
        step_id: step.id.clone(),
        step: step.clone(),
        trace_id: "trace-1".into(),
        state: StepState::Running,
        attempt: 0,
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
        summary: None,
        output: None,
        approvals: Default::default(),
        subject: Some(subject()),
    };
    store.remember_step(entry).await.unwrap();
    store
        .remember_plan_metadata(PlanMetadata {
            plan_id: "p1".into(),
            trace_id: "trace-1".into(),
            steps: vec![PlanStepSlot {
                step: step.clone(),
                attempt: 0,
                created_at_ms: 1_000,
                subject: Some(subject()),
            }],
            next_step_index: 1,
            last_completed_index: -1,
        })
        .await
        .unwrap();

    let job = PlanJob {
        plan_id: "p1".into(),
        step,
        attempt: 0,
        created_at_ms: 1_000,
        trace_id: "trace-1".into(),
        subject: Some(subject()),
    };
    broker
        .enqueue(
            "plan.steps",
            serde_json::to_vec(&job).unwrap(),
            EnqueueOptions::with_key(job.idempotency_key()),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn killed_mid_running_recovers_to_completed() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store: Arc<dyn PlanStateStore> = Arc::new(FileStateStore::with_clock(
        dir.path(),
        StoreOptions::default(),
        clock.clone(),
    ));
    let broker = MemoryBroker::new();
    seed_crashed_world(&store, &broker).await;

    let tools = FakeToolAgent::new();
    let runtime = Arc::new(PlanQueueRuntime::new(
        RuntimeDeps {
            queue: broker.clone(),
            tools: tools.clone(),
            policy: FakePolicy::new(),
            store: store.clone(),
            audit: Arc::new(MemoryAuditSink::new()),
        },
        clock.clone(),
        RuntimeConfig::default(),
    ));
    runtime.initialize().await.unwrap();

    // Redelivered once, executed once, completed.
    for _ in 0..200 {
        if store.list_plan_metadata().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(store.list_active_steps().await.unwrap().is_empty());
    assert_eq!(tools.call_count(&"p1".into(), &"a".into()), 1);
    assert_eq!(runtime.metrics().completed, 1);

    // Subject survived into the retention window after completion.
    assert!(runtime.get_plan_subject(&"p1".into()).await.unwrap().is_some());
    runtime.shutdown().await;
}

#[tokio::test]
async fn duplicate_delivery_of_the_same_attempt_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store: Arc<dyn PlanStateStore> = Arc::new(FileStateStore::with_clock(
        dir.path(),
        StoreOptions::default(),
        clock.clone(),
    ));
    let broker = MemoryBroker::new();
    seed_crashed_world(&store, &broker).await;
    // Second delivery of (p1, a, attempt=0).
    assert!(broker.redeliver_copy("plan.steps", "p1:a"));

    let tools = FakeToolAgent::new();
    let runtime = Arc::new(PlanQueueRuntime::new(
        RuntimeDeps {
            queue: broker.clone(),
            tools: tools.clone(),
            policy: FakePolicy::new(),
            store: store.clone(),
            audit: Arc::new(MemoryAuditSink::new()),
        },
        clock.clone(),
        RuntimeConfig::default(),
    ));
    runtime.initialize().await.unwrap();

    for _ in 0..200 {
        if broker.queue_depth("plan.steps").await.unwrap() == 0
            && store.list_plan_metadata().await.unwrap().is_empty()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    settle().await;
    assert_eq!(tools.call_count(&"p1".into(), &"a".into()), 1);
    assert_eq!(runtime.metrics().completed, 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn waiting_gate_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store: Arc<dyn PlanStateStore> = Arc::new(FileStateStore::with_clock(
        dir.path(),
        StoreOptions::default(),
        clock.clone(),
    ));
    let broker = MemoryBroker::new();

    // First life: submit a gated plan, then stop.
    {
        let runtime = Arc::new(PlanQueueRuntime::new(
            RuntimeDeps {
                queue: broker.clone(),
                tools: FakeToolAgent::new(),
                policy: FakePolicy::new(),
                store: store.clone(),
                audit: Arc::new(MemoryAuditSink::new()),
            },
            clock.clone(),
            RuntimeConfig::default(),
        ));
        runtime.initialize().await.unwrap();
        let plan = Plan::builder()
            .id("p1")
            .steps(vec![PlanStep::builder().id("a").approval_required(true).build()])
            .build();
        runtime
            .submit_plan(plan, "trace-1".into(), Some(subject()))
            .await
            .unwrap();
        runtime.shutdown().await;
    }

    // Second life: the gate rehydrates and resolves.
    let tools = FakeToolAgent::new();
    let runtime = Arc::new(PlanQueueRuntime::new(
        RuntimeDeps {
            queue: broker.clone(),
            tools: tools.clone(),
            policy: FakePolicy::new(),
            store: store.clone(),
            audit: Arc::new(MemoryAuditSink::new()),
        },
        clock.clone(),
        RuntimeConfig::default(),
    ));
    runtime.initialize().await.unwrap();

    // The rehydrated entry republished its last known state.
    let latest = runtime.latest_event(&"p1".into(), &"a".into()).unwrap();
    assert_eq!(latest.state, StepState::WaitingApproval);

    runtime
        .resolve_approval(&"p1".into(), &"a".into(), ApprovalDecision::approved())
        .await
        .unwrap();
    for _ in 0..200 {
        if store.list_plan_metadata().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tools.call_count(&"p1".into(), &"a".into()), 1);
    runtime.shutdown().await;
}
