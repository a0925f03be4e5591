// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan submission.

use super::PlanQueueRuntime;
use crate::error::RuntimeError;
use pq_adapters::{PolicyEnforcer, ToolAgentClient};
use pq_core::{Clock, Plan, PlanMetadata, PlanStepSlot, PlanSubject, TraceId};
use pq_queue::QueueAdapter;

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    /// Accept a plan: persist its subject and metadata, then release the
    /// first eligible step(s).
    ///
    /// Re-submitting a plan id that still has live state is rejected, so a
    /// gateway retry cannot double-enqueue (`PlanExists`).
    pub async fn submit_plan(
        &self,
        plan: Plan,
        trace_id: TraceId,
        subject: Option<PlanSubject>,
    ) -> Result<(), RuntimeError> {
        self.ensure_initialized()?;

        if self.store.get_plan_metadata(&plan.id).await?.is_some() {
            return Err(RuntimeError::PlanExists(plan.id));
        }

        match &subject {
            Some(subject) => self.subjects.put_live(plan.id.clone(), subject.clone()),
            None => self.subjects.remove(&plan.id),
        }

        let now = self.now();
        let slots = plan
            .steps
            .iter()
            .map(|step| PlanStepSlot {
                step: step.clone(),
                attempt: 0,
                created_at_ms: now,
                subject: subject.clone(),
            })
            .collect();
        let metadata = PlanMetadata::new(plan.id.clone(), trace_id, slots);

        tracing::info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            trace_id = %metadata.trace_id,
            "plan submitted"
        );
        self.store.remember_plan_metadata(metadata).await?;
        self.release_next(&plan.id).await
    }
}
