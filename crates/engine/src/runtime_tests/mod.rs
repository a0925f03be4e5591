// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for runtime tests.

mod approvals;
mod completions;
mod duplicates;
mod recovery;
mod retries;
mod submit;
mod subjects;

use crate::bus::EventStream;
use crate::config::RuntimeConfig;
use crate::runtime::{PlanQueueRuntime, RuntimeDeps};
use pq_adapters::{FakePolicy, FakeToolAgent, MemoryAuditSink};
use pq_core::{Clock, FakeClock, Plan, PlanStep, PlanStepEvent, PlanSubject, StepState};
use pq_queue::MemoryBroker;
use pq_storage::{FileStateStore, PlanStateStore, StoreOptions};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type TestRuntime =
    PlanQueueRuntime<MemoryBroker, FakeToolAgent, FakePolicy, FakeClock>;

pub(crate) struct TestContext {
    pub runtime: Arc<TestRuntime>,
    pub broker: MemoryBroker,
    pub tools: FakeToolAgent,
    pub policy: FakePolicy,
    pub audit: MemoryAuditSink,
    pub clock: FakeClock,
    pub store: Arc<dyn PlanStateStore>,
    _dir: tempfile::TempDir,
}

/// Build a runtime over fresh fakes without initializing it.
pub(crate) fn setup_uninitialized(config: RuntimeConfig) -> TestContext {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let tools = FakeToolAgent::new();
    let policy = FakePolicy::new();
    let audit = MemoryAuditSink::new();
    let clock = FakeClock::new();
    let store: Arc<dyn PlanStateStore> = Arc::new(FileStateStore::with_clock(
        dir.path(),
        StoreOptions::default(),
        clock.clone(),
    ));
    let runtime = Arc::new(PlanQueueRuntime::new(
        RuntimeDeps {
            queue: broker.clone(),
            tools: tools.clone(),
            policy: policy.clone(),
            store: store.clone(),
            audit: Arc::new(audit.clone()),
        },
        clock.clone(),
        config,
    ));
    TestContext { runtime, broker, tools, policy, audit, clock, store, _dir: dir }
}

pub(crate) async fn setup_with_config(config: RuntimeConfig) -> TestContext {
    let ctx = setup_uninitialized(config);
    ctx.runtime.initialize().await.unwrap();
    ctx
}

pub(crate) async fn setup() -> TestContext {
    setup_with_config(RuntimeConfig::default()).await
}

/// A plan of unguarded steps with the given ids.
pub(crate) fn plan_of(id: &str, step_ids: &[&str]) -> Plan {
    Plan::builder()
        .id(id)
        .steps(step_ids.iter().map(|s| PlanStep::builder().id(*s).build()).collect())
        .build()
}

pub(crate) fn subject() -> PlanSubject {
    PlanSubject::builder()
        .user_id("user-7")
        .roles(["operator".to_string()].into_iter().collect())
        .build()
}

/// Next event within a bounded wait.
pub(crate) async fn recv_event(stream: &mut EventStream) -> PlanStepEvent {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Assert the next events are exactly `(step, state, attempt)` in order.
pub(crate) async fn expect_sequence(
    stream: &mut EventStream,
    expected: &[(&str, StepState, u32)],
) {
    for (step_id, state, attempt) in expected {
        let event = recv_event(stream).await;
        assert_eq!(
            (event.step_id.as_str(), event.state, event.attempt),
            (*step_id, *state, *attempt),
            "unexpected event {event:?}"
        );
    }
}

/// Wait until no live entries or metadata remain in the store.
pub(crate) async fn await_empty_store(ctx: &TestContext) {
    for _ in 0..200 {
        let steps = ctx.store.list_active_steps().await.unwrap();
        let plans = ctx.store.list_plan_metadata().await.unwrap();
        if steps.is_empty() && plans.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state store never drained");
}

/// Give in-flight consumer work a moment to settle.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
