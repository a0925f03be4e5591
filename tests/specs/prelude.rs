// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec harness.

pub use pq_adapters::{FakePolicy, FakeToolAgent, MemoryAuditSink, ToolEvent};
pub use pq_core::{
    ApprovalDecision, FakeClock, Plan, PlanStep, PlanStepEvent, PlanSubject, StepState,
};
pub use pq_engine::{EventStream, PlanQueueRuntime, RuntimeConfig, RuntimeDeps, RuntimeError};
pub use pq_queue::{EnqueueOptions, MemoryBroker, QueueAdapter};
pub use pq_storage::{FileStateStore, PlanStateStore, SqliteStateStore, StoreOptions};
pub use std::sync::Arc;
pub use std::time::Duration;

pub type Runtime = PlanQueueRuntime<MemoryBroker, FakeToolAgent, FakePolicy, FakeClock>;

/// Everything a spec needs: the runtime plus handles onto its fakes.
pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub broker: MemoryBroker,
    pub tools: FakeToolAgent,
    pub policy: FakePolicy,
    pub audit: MemoryAuditSink,
    pub clock: FakeClock,
    pub store: Arc<dyn PlanStateStore>,
    _dir: Option<tempfile::TempDir>,
}

impl Harness {
    /// Runtime over the file-backed store, initialized and ready.
    pub async fn file() -> Harness {
        Self::file_with(RuntimeConfig::default()).await
    }

    pub async fn file_with(config: RuntimeConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let clock = FakeClock::new();
        let store: Arc<dyn PlanStateStore> = Arc::new(FileStateStore::with_clock(
            dir.path(),
            StoreOptions::default(),
            clock.clone(),
        ));
        Self::start(store, clock, config, Some(dir)).await
    }

    /// Runtime over the relational (SQLite) store.
    pub async fn relational() -> Harness {
        let clock = FakeClock::new();
        let store: Arc<dyn PlanStateStore> = Arc::new(
            SqliteStateStore::connect_with_clock(
                "sqlite::memory:",
                StoreOptions::default(),
                clock.clone(),
            )
            .await
            .unwrap(),
        );
        Self::start(store, clock, RuntimeConfig::default(), None).await
    }

    async fn start(
        store: Arc<dyn PlanStateStore>,
        clock: FakeClock,
        config: RuntimeConfig,
        dir: Option<tempfile::TempDir>,
    ) -> Harness {
        let broker = MemoryBroker::new();
        let tools = FakeToolAgent::new();
        let policy = FakePolicy::new();
        let audit = MemoryAuditSink::new();
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
        runtime.initialize().await.unwrap();
        Harness { runtime, broker, tools, policy, audit, clock, store, _dir: dir }
    }

    /// Wait until the store holds no entries and no metadata.
    pub async fn await_drained(&self) {
        for _ in 0..200 {
            let steps = self.store.list_active_steps().await.unwrap();
            let plans = self.store.list_plan_metadata().await.unwrap();
            if steps.is_empty() && plans.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("state store never drained");
    }
}

/// A plan of unguarded steps with the given ids.
pub fn plan_of(id: &str, step_ids: &[&str]) -> Plan {
    Plan::builder()
        .id(id)
        .steps(step_ids.iter().map(|s| PlanStep::builder().id(*s).build()).collect())
        .build()
}

pub fn subject() -> PlanSubject {
    PlanSubject::builder()
        .user_id("user-7")
        .scopes(["plans:execute".to_string()].into_iter().collect())
        .build()
}

pub async fn recv(stream: &mut EventStream) -> PlanStepEvent {
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Assert the next events are exactly `(step, state, attempt)` in order.
pub async fn expect_sequence(stream: &mut EventStream, expected: &[(&str, StepState, u32)]) {
    for (step_id, state, attempt) in expected {
        let event = recv(stream).await;
        assert_eq!(
            (event.step_id.as_str(), event.state, event.attempt),
            (*step_id, *state, *attempt),
            "unexpected event {event:?}"
        );
    }
}

/// Give the consumers a moment to settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
