// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval resolution.
//!
//! Approvals never enqueue directly: a grant is recorded and the release
//! loop re-runs, which keeps a single code path for everything that enters
//! the queue.

use super::PlanQueueRuntime;
use crate::error::RuntimeError;
use pq_adapters::{AuditAction, AuditRecord, PolicyEnforcer, ToolAgentClient};
use pq_core::{step_key, ApprovalDecision, Clock, PlanId, PlanStepEntry, PlanStepEvent, StepId, StepState};
use pq_queue::QueueAdapter;

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    /// Resolve a human decision on a step's approval gate.
    pub async fn resolve_approval(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        decision: ApprovalDecision,
    ) -> Result<(), RuntimeError> {
        self.ensure_initialized()?;

        // The store is authoritative; rehydrate the registry from it when
        // the caches went cold (restart between waiting and resolution).
        let Some(entry) = self.store.get_entry(plan_id, step_id).await? else {
            return Err(RuntimeError::StepUnavailable {
                plan_id: plan_id.clone(),
                step_id: step_id.clone(),
            });
        };
        if self.registry.get(&step_key(plan_id, step_id)).is_none() {
            self.registry.insert(&entry);
        }

        match decision {
            ApprovalDecision::Rejected { rationale } => {
                self.reject_step(&entry, rationale).await
            }
            ApprovalDecision::Approved { rationale } => {
                self.approve_step(&entry, rationale).await
            }
        }
    }

    async fn reject_step(
        &self,
        entry: &PlanStepEntry,
        rationale: Option<String>,
    ) -> Result<(), RuntimeError> {
        let summary = rationale.clone().unwrap_or_else(|| "approval rejected".to_string());
        self.audit.record(
            AuditRecord::now(
                AuditAction::ApprovalRejected,
                entry.plan_id.clone(),
                entry.step_id.clone(),
                entry.step.capability.clone(),
            )
            .detail(summary.clone()),
        );

        let event = PlanStepEvent::for_entry(entry, StepState::Rejected, self.now())
            .summary(summary);
        self.publish_event(event);
        self.cleanup_step(&entry.plan_id, &entry.step_id).await?;
        self.halt_plan(&entry.plan_id).await?;
        self.record_terminal_metric(StepState::Rejected);
        tracing::info!(
            plan_id = %entry.plan_id,
            step_id = %entry.step_id,
            "approval rejected, chain halted"
        );
        Ok(())
    }

    async fn approve_step(
        &self,
        entry: &PlanStepEntry,
        rationale: Option<String>,
    ) -> Result<(), RuntimeError> {
        let plan_id = &entry.plan_id;
        let step_id = &entry.step_id;

        // Tentative grant, checked against policy before it is persisted.
        let mut approvals = self.load_approvals(plan_id, step_id).await?;
        approvals.insert(entry.step.capability.clone(), true);

        let subject = entry.subject.clone().or_else(|| self.subjects.get(plan_id));
        let ctx = self.policy_context(plan_id, &entry.trace_id, approvals.clone(), subject);
        let decision = self.policy.enforce_plan_step(&entry.step, &ctx).await;
        if decision.is_blocked() {
            let summary = decision.blocking_summary();
            self.audit.record(
                AuditRecord::now(
                    AuditAction::PolicyDenied,
                    plan_id.clone(),
                    step_id.clone(),
                    entry.step.capability.clone(),
                )
                .detail(summary.clone()),
            );
            let event = PlanStepEvent::for_entry(entry, StepState::Rejected, self.now())
                .summary(summary);
            self.publish_event(event);
            self.cleanup_step(plan_id, step_id).await?;
            self.halt_plan(plan_id).await?;
            self.record_terminal_metric(StepState::Rejected);
            return Err(RuntimeError::PolicyDenied(decision.deny));
        }

        self.store
            .record_approval(plan_id, step_id, &entry.step.capability, true)
            .await?;
        self.approvals.set(&step_key(plan_id, step_id), approvals.clone());

        self.audit.record(
            AuditRecord::now(
                AuditAction::ApprovalGranted,
                plan_id.clone(),
                step_id.clone(),
                entry.step.capability.clone(),
            )
            .detail(rationale.clone().unwrap_or_default()),
        );

        let mut event = PlanStepEvent::for_entry(entry, StepState::Approved, self.now())
            .approvals(approvals);
        event.summary = rationale;
        self.publish_event(event);

        // The gated step's index was never advanced past, so release
        // re-enters it, and this time the gate is satisfied.
        self.release_next(plan_id).await
    }
}
