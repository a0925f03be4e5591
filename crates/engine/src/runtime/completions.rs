// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Completion consumer: reconciles externally reported step outcomes.
//!
//! External workers publish to `plan.completions` with a thin payload; the
//! consumer merges the descriptive step fields back in from the persisted
//! entry (or the registry, or the plan metadata) and drives the same state
//! machine as the in-process step consumer.

use super::PlanQueueRuntime;
use crate::config::COMPLETION_QUEUE;
use async_trait::async_trait;
use pq_adapters::{PolicyEnforcer, ToolAgentClient};
use pq_core::{
    step_key, Clock, PlanStep, PlanStepEvent, StepCompletion, StepState, TraceId,
};
use pq_queue::{Delivery, DeliveryHandler, Disposition, QueueAdapter};
use pq_storage::StateUpdate;
use std::sync::Arc;
use tracing::Instrument;

pub(crate) struct CompletionHandler<Q, T, P, C: Clock> {
    pub runtime: Arc<PlanQueueRuntime<Q, T, P, C>>,
}

#[async_trait]
impl<Q, T, P, C> DeliveryHandler for CompletionHandler<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    async fn handle(&self, delivery: Delivery) -> Disposition {
        let completion: StepCompletion = match serde_json::from_slice(&delivery.payload) {
            Ok(completion) => completion,
            Err(err) => {
                tracing::error!(error = %err, id = %delivery.id, "undecodable completion payload");
                return Disposition::DeadLetter { reason: format!("undecodable payload: {err}") };
            }
        };
        let span = tracing::info_span!(
            "plan_completion",
            queue = COMPLETION_QUEUE,
            plan.id = %completion.plan_id,
            plan.step_id = %completion.step_id,
            state = %completion.state,
            attempt = completion.attempt,
        );
        self.runtime.handle_completion(completion).instrument(span).await
    }
}

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    pub(crate) async fn handle_completion(&self, completion: StepCompletion) -> Disposition {
        let plan_id = &completion.plan_id;
        let step_id = &completion.step_id;

        // 1. Persist the reported state onto the live entry (no-op when the
        // step already went terminal).
        let mut update =
            StateUpdate::to(completion.state).attempt(completion.attempt);
        if let Some(summary) = &completion.summary {
            update = update.summary(summary.clone());
        }
        if let Some(output) = &completion.output {
            update = update.output(output.clone());
        }
        if let Err(err) = self.store.set_state(plan_id, step_id, update).await {
            tracing::warn!(error = %err, "failed to persist completion, redelivering");
            return Disposition::Retry { delay_ms: None };
        }

        // 2. Publish, merging descriptive fields the payload omits.
        let Some((step, trace_id)) = self.describe_step(&completion).await else {
            tracing::warn!("completion for unknown step, acking");
            return Disposition::Ack;
        };
        let mut event = PlanStepEvent::for_step(
            plan_id.clone(),
            &step,
            completion.state,
            completion.attempt,
            trace_id,
            self.now(),
        );
        event.summary = completion.summary.clone();
        event.output = completion.output.clone();
        self.publish_event(event);

        // 3. Terminal outcomes retire the entry and move the plan along.
        if completion.state.is_terminal() {
            if let Err(err) = self.cleanup_step(plan_id, step_id).await {
                tracing::warn!(error = %err, "cleanup failed for completed step, redelivering");
                return Disposition::Retry { delay_ms: None };
            }
            if completion.state == StepState::Completed {
                let index = match self.store.get_plan_metadata(plan_id).await {
                    Ok(Some(metadata)) => metadata.step_index(step_id),
                    _ => None,
                };
                if let Some(index) = index {
                    if let Err(err) = self.advance_and_release(plan_id, index).await {
                        tracing::warn!(error = %err, "release after external completion failed");
                    }
                }
            } else if let Err(err) = self.halt_plan(plan_id).await {
                tracing::warn!(error = %err, "plan halt failed after external completion");
            }
            self.record_terminal_metric(completion.state);
        }

        Disposition::Ack
    }

    /// Step snapshot and trace id for a completion, from the richest
    /// available source: persisted entry, then registry, then metadata.
    async fn describe_step(
        &self,
        completion: &StepCompletion,
    ) -> Option<(PlanStep, TraceId)> {
        if let Ok(Some(entry)) =
            self.store.get_entry(&completion.plan_id, &completion.step_id).await
        {
            return Some((entry.step, entry.trace_id));
        }
        if let Some(cached) =
            self.registry.get(&step_key(&completion.plan_id, &completion.step_id))
        {
            return Some((cached.step, cached.trace_id));
        }
        if let Ok(Some(metadata)) = self.store.get_plan_metadata(&completion.plan_id).await {
            if let Some(slot) =
                metadata.steps.iter().find(|s| s.step.id == completion.step_id)
            {
                return Some((slot.step.clone(), metadata.trace_id));
            }
        }
        None
    }
}
