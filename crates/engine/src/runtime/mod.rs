// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The plan queue runtime.
//!
//! One instance owns the step and completion consumers, the event bus, the
//! in-memory caches, and the retention sweeper. The state store stays
//! authoritative throughout; every cache here can be rebuilt from it.

mod approval;
mod completions;
mod rehydrate;
mod release;
mod steps;
mod submit;

use crate::bus::{EventBus, EventStream};
use crate::config::{backoff_delay_ms, RuntimeConfig, COMPLETION_QUEUE, STEP_QUEUE};
use crate::error::RuntimeError;
use crate::metrics::{MetricsSnapshot, RuntimeMetrics};
use crate::registry::{ApprovalCache, PlanLocks, StepRegistry, SubjectCache};
use pq_adapters::{AuditSink, PolicyContext, PolicyEnforcer, ToolAgentClient};
use pq_core::{
    step_key, Clock, PlanId, PlanStepEvent, PlanSubject, StepId, StepState, TraceId,
};
use pq_queue::{ConsumerHandle, QueueAdapter};
use pq_storage::PlanStateStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use completions::CompletionHandler;
use steps::StepHandler;

/// Adapter dependencies handed to [`PlanQueueRuntime::new`].
pub struct RuntimeDeps<Q, T, P> {
    pub queue: Q,
    pub tools: T,
    pub policy: P,
    pub store: Arc<dyn PlanStateStore>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Default)]
struct LifecycleState {
    consumers: Vec<ConsumerHandle>,
    sweeper: Option<(CancellationToken, JoinHandle<()>)>,
}

/// The durable workflow engine at the heart of the orchestration service.
pub struct PlanQueueRuntime<Q, T, P, C: Clock> {
    pub(crate) queue: Q,
    pub(crate) tools: T,
    pub(crate) policy: P,
    pub(crate) store: Arc<dyn PlanStateStore>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) clock: C,
    pub(crate) config: RuntimeConfig,
    pub(crate) bus: EventBus<C>,
    pub(crate) metrics: RuntimeMetrics,
    pub(crate) registry: StepRegistry,
    pub(crate) approvals: ApprovalCache,
    pub(crate) subjects: SubjectCache<C>,
    pub(crate) plan_locks: PlanLocks,
    init_latch: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    lifecycle: parking_lot::Mutex<LifecycleState>,
}

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    /// Create a runtime. Call [`initialize`](Self::initialize) before
    /// submitting plans.
    pub fn new(deps: RuntimeDeps<Q, T, P>, clock: C, config: RuntimeConfig) -> Self {
        Self {
            queue: deps.queue,
            tools: deps.tools,
            policy: deps.policy,
            store: deps.store,
            audit: deps.audit,
            bus: EventBus::new(clock.clone(), config.history_retention_ms),
            subjects: SubjectCache::new(clock.clone(), config.history_retention_ms),
            clock,
            config,
            metrics: RuntimeMetrics::default(),
            registry: StepRegistry::default(),
            approvals: ApprovalCache::default(),
            plan_locks: PlanLocks::default(),
            init_latch: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            lifecycle: parking_lot::Mutex::new(LifecycleState::default()),
        }
    }

    /// Register consumers, rehydrate persisted state, and start the
    /// retention sweeper. Idempotent; concurrent calls serialize on a
    /// latch. Failures retry up to `init_max_attempts` with exponential
    /// backoff, reversing any partial registration in between.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let _latch = self.init_latch.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let max_attempts = self.config.init_max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match self.try_initialize().await {
                Ok(()) => {
                    self.initialized.store(true, Ordering::Release);
                    self.refresh_queue_depth().await;
                    tracing::info!("plan queue runtime initialized");
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, attempt, "initialize failed, retrying");
                    if let Some(base) = self.config.init_backoff_ms {
                        let delay = backoff_delay_ms(base, attempt - 1);
                        if delay > 0 {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                    }
                }
            }
        }
    }

    /// One initialization attempt. Consumers registered by a failed
    /// attempt are stopped so the retry does not duplicate them.
    async fn try_initialize(self: &Arc<Self>) -> Result<(), RuntimeError> {
        // Entries first: orphaned `running` steps must be reset before a
        // consumer can see their redelivered messages.
        self.restore_pending_entries().await?;

        let step_handler = Arc::new(StepHandler { runtime: self.clone() });
        let step_consumer = self.queue.consume(STEP_QUEUE, step_handler).await?;

        let completion_handler = Arc::new(CompletionHandler { runtime: self.clone() });
        let completion_consumer = match self.queue.consume(COMPLETION_QUEUE, completion_handler).await
        {
            Ok(handle) => handle,
            Err(err) => {
                step_consumer.stop().await;
                return Err(err.into());
            }
        };

        if let Err(err) = self.resume_pending_plans().await {
            step_consumer.stop().await;
            completion_consumer.stop().await;
            return Err(err);
        }

        let sweeper = self.spawn_sweeper();
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.consumers = vec![step_consumer, completion_consumer];
        lifecycle.sweeper = Some(sweeper);
        Ok(())
    }

    /// Stop consumers, cancel the sweeper, and drop all in-memory state.
    /// In-flight handlers run to completion first.
    pub async fn shutdown(&self) {
        let LifecycleState { consumers, sweeper } = std::mem::take(&mut *self.lifecycle.lock());
        for consumer in consumers {
            consumer.stop().await;
        }
        if let Some((token, task)) = sweeper {
            token.cancel();
            let _ = task.await;
        }
        self.registry.clear();
        self.approvals.clear();
        self.subjects.clear();
        self.plan_locks.clear();
        self.bus.clear();
        self.initialized.store(false, Ordering::Release);
        tracing::info!("plan queue runtime shut down");
    }

    /// The subject a plan runs for: live, retained within the history
    /// window, or recovered from the state store. Always a clone.
    pub async fn get_plan_subject(
        &self,
        plan_id: &PlanId,
    ) -> Result<Option<PlanSubject>, RuntimeError> {
        self.ensure_initialized()?;
        if let Some(subject) = self.subjects.get(plan_id) {
            return Ok(Some(subject));
        }
        if let Some(metadata) = self.store.get_plan_metadata(plan_id).await? {
            if let Some(subject) = metadata.steps.iter().find_map(|s| s.subject.clone()) {
                return Ok(Some(subject));
            }
        }
        let entries = self.store.list_active_steps().await?;
        Ok(entries.into_iter().find(|e| &e.plan_id == plan_id).and_then(|e| e.subject))
    }

    /// Subscribe to a plan's event stream (retained history, then live).
    pub fn subscribe(&self, plan_id: &PlanId) -> EventStream {
        self.bus.subscribe(plan_id)
    }

    /// Most recent retained event for a step.
    pub fn latest_event(&self, plan_id: &PlanId, step_id: &StepId) -> Option<PlanStepEvent> {
        self.bus.latest(plan_id, step_id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ---- shared internals ----

    pub(crate) fn ensure_initialized(&self) -> Result<(), RuntimeError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RuntimeError::NotInitialized)
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.epoch_ms()
    }

    /// Publish through the bus, honoring the content-capture switch.
    pub(crate) fn publish_event(&self, mut event: PlanStepEvent) {
        if !self.config.capture_output {
            event.output = None;
        }
        self.bus.publish(event);
    }

    /// Approvals for a step: cache first, state store on miss.
    pub(crate) async fn load_approvals(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<BTreeMap<String, bool>, RuntimeError> {
        let key = step_key(plan_id, step_id);
        if let Some(approvals) = self.approvals.get(&key) {
            return Ok(approvals);
        }
        let approvals = self
            .store
            .get_entry(plan_id, step_id)
            .await?
            .map(|entry| entry.approvals)
            .unwrap_or_default();
        self.approvals.set(&key, approvals.clone());
        Ok(approvals)
    }

    pub(crate) fn policy_context(
        &self,
        plan_id: &PlanId,
        trace_id: &TraceId,
        approvals: BTreeMap<String, bool>,
        subject: Option<PlanSubject>,
    ) -> PolicyContext {
        PolicyContext {
            plan_id: plan_id.clone(),
            trace_id: trace_id.clone(),
            approvals,
            subject,
        }
    }

    /// Delete a step's persisted entry and cached state.
    pub(crate) async fn cleanup_step(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<(), RuntimeError> {
        self.store.forget_step(plan_id, step_id).await?;
        let key = step_key(plan_id, step_id);
        self.registry.remove(&key);
        self.approvals.remove(&key);
        Ok(())
    }

    /// End a plan whose chain halted (rejection, terminal failure, dead
    /// letter): forget its metadata, evict its lock, retain its subject
    /// for the history window.
    pub(crate) async fn halt_plan(&self, plan_id: &PlanId) -> Result<(), RuntimeError> {
        self.store.forget_plan_metadata(plan_id).await?;
        self.plan_locks.evict(plan_id);
        self.subjects.prune(plan_id);
        Ok(())
    }

    /// Refresh the step-queue depth gauge.
    pub(crate) async fn refresh_queue_depth(&self) {
        if let Ok(depth) = self.queue.queue_depth(STEP_QUEUE).await {
            self.metrics.set_step_queue_depth(depth);
        }
    }

    pub(crate) fn record_terminal_metric(&self, state: StepState) {
        self.metrics.record_terminal(state);
    }

    fn spawn_sweeper(self: &Arc<Self>) -> (CancellationToken, JoinHandle<()>) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(self);
        let interval =
            Duration::from_millis(self.config.history_retention_ms.clamp(1_000, 60_000));
        let plan_state_days = self.config.plan_state_days;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(runtime) = weak.upgrade() else { break };
                runtime.bus.prune();
                runtime.subjects.sweep();
                if plan_state_days > 0 {
                    let cutoff = runtime
                        .clock
                        .epoch_ms()
                        .saturating_sub(u64::from(plan_state_days) * 86_400_000);
                    if let Err(err) = runtime.store.sweep_expired(cutoff).await {
                        tracing::warn!(error = %err, "retention sweep failed");
                    }
                }
            }
        });
        (token, task)
    }
}

#[cfg(test)]
#[path = "../runtime_tests/mod.rs"]
mod tests;
