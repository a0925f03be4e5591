// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cold-start rehydration.
//!
//! Two phases around consumer registration. Entries are restored first:
//! steps found `running` belong to a worker that died with the old process
//! and must be reset to `queued` before any consumer can see their
//! redelivered messages (the duplicate barrier would otherwise drop them).
//! Plan release resumes after the consumers exist, so anything it enqueues
//! has somewhere to go.

use super::PlanQueueRuntime;
use crate::error::RuntimeError;
use pq_adapters::{PolicyEnforcer, ToolAgentClient};
use pq_core::{Clock, PlanStepEvent, StepState};
use pq_queue::QueueAdapter;
use pq_storage::StateUpdate;

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    /// Phase one: replay live entries into the caches, reset orphaned
    /// `running` steps, republish each entry's last known state.
    pub(crate) async fn restore_pending_entries(&self) -> Result<(), RuntimeError> {
        let entries = self.store.list_active_steps().await?;
        let restored = entries.len();
        for mut entry in entries {
            if entry.state == StepState::Running {
                tracing::info!(
                    plan_id = %entry.plan_id,
                    step_id = %entry.step_id,
                    attempt = entry.attempt,
                    "resetting orphaned running step to queued"
                );
                self.store
                    .set_state(
                        &entry.plan_id,
                        &entry.step_id,
                        StateUpdate::to(StepState::Queued),
                    )
                    .await?;
                entry.state = StepState::Queued;
            }

            self.registry.insert(&entry);
            self.approvals.set(
                &pq_core::step_key(&entry.plan_id, &entry.step_id),
                entry.approvals.clone(),
            );
            if let Some(subject) = &entry.subject {
                self.subjects.put_live(entry.plan_id.clone(), subject.clone());
            }

            // Re-sync late subscribers with the last known state.
            self.publish_event(PlanStepEvent::for_entry(&entry, entry.state, self.now()));
        }
        if restored > 0 {
            tracing::info!(restored, "rehydrated pending steps");
        }
        Ok(())
    }

    /// Phase two: restore plan subjects and resume release for every
    /// surviving plan.
    pub(crate) async fn resume_pending_plans(&self) -> Result<(), RuntimeError> {
        let plans = self.store.list_plan_metadata().await?;
        for metadata in plans {
            if let Some(subject) = metadata.steps.iter().find_map(|s| s.subject.clone()) {
                self.subjects.put_live(metadata.plan_id.clone(), subject);
            }
            // May be a no-op when the next step still waits on approval or
            // is already live on the queue.
            match self.release_next(&metadata.plan_id).await {
                Ok(()) => {}
                // A denial halts that one plan (its rejected event is
                // already out); it must not wedge initialization.
                Err(RuntimeError::PolicyDenied(deny)) => {
                    tracing::warn!(
                        plan_id = %metadata.plan_id,
                        reasons = deny.len(),
                        "plan rejected by policy during rehydration"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
