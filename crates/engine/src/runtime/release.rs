// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step release: the single choke point deciding what enters the queue.

use super::PlanQueueRuntime;
use crate::config::STEP_QUEUE;
use crate::error::RuntimeError;
use pq_adapters::{AuditAction, AuditRecord, PolicyEnforcer, ToolAgentClient};
use pq_core::{
    Clock, PlanId, PlanJob, PlanStepEntry, PlanStepEvent, PlanStepSlot, StepState, TraceId,
    TRACE_ID_HEADER,
};
use pq_queue::{EnqueueOptions, QueueAdapter};
use std::collections::BTreeMap;

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    /// Release the next eligible step(s) of a plan, serialized per plan.
    pub(crate) async fn release_next(&self, plan_id: &PlanId) -> Result<(), RuntimeError> {
        let lock = self.plan_locks.lock_for(plan_id);
        let _guard = lock.lock().await;
        let result = self.release_next_locked(plan_id).await;
        self.refresh_queue_depth().await;
        result
    }

    /// Record a step completion and keep releasing, all under one
    /// acquisition of the plan lock so completion reconciliation and
    /// release never interleave.
    pub(crate) async fn advance_and_release(
        &self,
        plan_id: &PlanId,
        completed_index: usize,
    ) -> Result<(), RuntimeError> {
        let lock = self.plan_locks.lock_for(plan_id);
        let _guard = lock.lock().await;
        let result = self.advance_locked(plan_id, completed_index).await;
        self.refresh_queue_depth().await;
        result
    }

    async fn advance_locked(
        &self,
        plan_id: &PlanId,
        completed_index: usize,
    ) -> Result<(), RuntimeError> {
        let Some(mut metadata) = self.store.get_plan_metadata(plan_id).await? else {
            return Ok(());
        };
        metadata.mark_completed(completed_index);
        if metadata.is_complete() {
            tracing::info!(plan_id = %plan_id, "plan completed");
            self.store.forget_plan_metadata(plan_id).await?;
            self.plan_locks.evict(plan_id);
            self.subjects.prune(plan_id);
            return Ok(());
        }
        self.store.remember_plan_metadata(metadata).await?;
        self.release_next_locked(plan_id).await
    }

    /// The release loop. Caller holds the plan lock.
    async fn release_next_locked(&self, plan_id: &PlanId) -> Result<(), RuntimeError> {
        let Some(mut metadata) = self.store.get_plan_metadata(plan_id).await? else {
            // Absent metadata means the plan already finished.
            return Ok(());
        };
        let trace_id = metadata.trace_id.clone();

        while metadata.next_step_index < metadata.steps.len()
            && (metadata.next_step_index as i64) <= metadata.last_completed_index + 1
        {
            let slot = metadata.steps[metadata.next_step_index].clone();
            let step_id = slot.step.id.clone();

            // Another path (a concurrent release, or rehydration finding a
            // live entry) already put this step in motion.
            if let Some(existing) = self.store.get_entry(plan_id, &step_id).await? {
                if existing.state.is_active() {
                    break;
                }
            }

            let approvals = self.load_approvals(plan_id, &step_id).await?;
            let subject =
                slot.subject.clone().or_else(|| self.subjects.get(plan_id));

            let ctx =
                self.policy_context(plan_id, &trace_id, approvals.clone(), subject.clone());
            let decision = self.policy.enforce_plan_step(&slot.step, &ctx).await;
            if decision.is_blocked() {
                let summary = decision.blocking_summary();
                self.audit.record(
                    AuditRecord::now(
                        AuditAction::PolicyDenied,
                        plan_id.clone(),
                        step_id.clone(),
                        slot.step.capability.clone(),
                    )
                    .detail(summary.clone())
                    .user_id(subject.map(|s| s.user_id).unwrap_or_default()),
                );
                let event = self
                    .release_event(plan_id, &slot, StepState::Rejected, &trace_id)
                    .summary(summary);
                self.publish_event(event);
                self.cleanup_step(plan_id, &step_id).await?;
                self.halt_plan(plan_id).await?;
                self.record_terminal_metric(StepState::Rejected);
                return Err(RuntimeError::PolicyDenied(decision.deny));
            }

            let capability_granted =
                approvals.get(&slot.step.capability).copied().unwrap_or(false);
            if slot.step.approval_required && !capability_granted {
                let entry = self
                    .persist_released_entry(
                        plan_id,
                        &slot,
                        &trace_id,
                        approvals,
                        StepState::WaitingApproval,
                    )
                    .await?;
                self.publish_event(PlanStepEvent::for_entry(
                    &entry,
                    StepState::WaitingApproval,
                    self.now(),
                ));
                tracing::info!(
                    plan_id = %plan_id,
                    step_id = %step_id,
                    capability = %slot.step.capability,
                    "step parked awaiting approval"
                );
                // Release resumes from this index once approval lands.
                break;
            }

            let entry = self
                .persist_released_entry(plan_id, &slot, &trace_id, approvals, StepState::Queued)
                .await?;
            let job = PlanJob {
                plan_id: plan_id.clone(),
                step: slot.step.clone(),
                attempt: entry.attempt,
                created_at_ms: self.now(),
                trace_id: trace_id.clone(),
                subject: entry.subject.clone(),
            };
            let payload = serde_json::to_vec(&job)?;
            let opts = EnqueueOptions::with_key(job.idempotency_key())
                .header(TRACE_ID_HEADER, trace_id.as_str());
            if let Err(err) = self.queue.enqueue(STEP_QUEUE, payload, opts).await {
                let event = self
                    .release_event(plan_id, &slot, StepState::Failed, &trace_id)
                    .summary(format!("enqueue failed: {err}"));
                self.publish_event(event);
                self.cleanup_step(plan_id, &step_id).await?;
                self.halt_plan(plan_id).await?;
                self.record_terminal_metric(StepState::Failed);
                return Err(err.into());
            }
            self.publish_event(PlanStepEvent::for_entry(&entry, StepState::Queued, self.now()));

            metadata.next_step_index += 1;
        }

        if metadata.is_complete() {
            self.store.forget_plan_metadata(plan_id).await?;
            self.plan_locks.evict(plan_id);
            self.subjects.prune(plan_id);
        } else {
            self.store.remember_plan_metadata(metadata).await?;
        }
        Ok(())
    }

    fn release_event(
        &self,
        plan_id: &PlanId,
        slot: &PlanStepSlot,
        state: StepState,
        trace_id: &TraceId,
    ) -> PlanStepEvent {
        PlanStepEvent::for_step(
            plan_id.clone(),
            &slot.step,
            state,
            slot.attempt,
            trace_id.clone(),
            self.now(),
        )
    }

    /// Upsert the persisted entry for a step being released and mirror it
    /// into the caches.
    async fn persist_released_entry(
        &self,
        plan_id: &PlanId,
        slot: &PlanStepSlot,
        trace_id: &TraceId,
        approvals: BTreeMap<String, bool>,
        state: StepState,
    ) -> Result<PlanStepEntry, RuntimeError> {
        let now = self.now();
        let entry = match self.store.get_entry(plan_id, &slot.step.id).await? {
            Some(mut existing) => {
                self.store
                    .set_state(plan_id, &slot.step.id, pq_storage::StateUpdate::to(state))
                    .await?;
                existing.state = state;
                existing.updated_at_ms = now;
                existing
            }
            None => {
                let entry = PlanStepEntry {
                    plan_id: plan_id.clone(),
                    step_id: slot.step.id.clone(),
                    step: slot.step.clone(),
                    trace_id: trace_id.clone(),
                    state,
                    attempt: slot.attempt,
                    created_at_ms: now,
                    updated_at_ms: now,
                    summary: None,
                    output: None,
                    approvals: approvals.clone(),
                    subject: slot
                        .subject
                        .clone()
                        .or_else(|| self.subjects.get(plan_id)),
                };
                self.store.remember_step(entry.clone()).await?;
                entry
            }
        };
        self.registry.insert(&entry);
        self.approvals
            .set(&pq_core::step_key(plan_id, &slot.step.id), entry.approvals.clone());
        Ok(entry)
    }
}
