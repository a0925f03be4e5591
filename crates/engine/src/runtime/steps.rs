// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step consumer: executes released steps against the tool agent.
//!
//! Duplicate deliveries are resolved by a three-check barrier (the
//! registry's in-flight flag, the attempt comparison against the persisted
//! entry, and the plan metadata's completed-index gate), so replays after a
//! crash or a broker redelivery never double-execute a step.

use super::PlanQueueRuntime;
use crate::config::{backoff_delay_ms, STEP_QUEUE};
use crate::error::RuntimeError;
use async_trait::async_trait;
use pq_adapters::{
    execute_with_deadline, AuditAction, AuditRecord, PolicyEnforcer, ToolAgentClient,
    ToolCallOptions, ToolError, ToolEvent, ToolRequest,
};
use pq_core::{Clock, PlanJob, PlanStepEntry, PlanStepEvent, StepState};
use pq_queue::{Delivery, DeliveryHandler, Disposition, QueueAdapter};
use pq_storage::StateUpdate;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

pub(crate) struct StepHandler<Q, T, P, C: Clock> {
    pub runtime: Arc<PlanQueueRuntime<Q, T, P, C>>,
}

#[async_trait]
impl<Q, T, P, C> DeliveryHandler for StepHandler<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    async fn handle(&self, delivery: Delivery) -> Disposition {
        let job: PlanJob = match serde_json::from_slice(&delivery.payload) {
            Ok(job) => job,
            Err(err) => {
                tracing::error!(error = %err, id = %delivery.id, "undecodable step payload");
                return Disposition::DeadLetter { reason: format!("undecodable payload: {err}") };
            }
        };
        // The broker's redelivery count can outrun the payload after a
        // crash; take whichever is higher.
        let attempt = job.attempt.max(delivery.attempts);
        let span = tracing::info_span!(
            "plan_step",
            queue = STEP_QUEUE,
            plan.id = %job.plan_id,
            plan.step_id = %job.step.id,
            trace.id = %job.trace_id,
            attempt,
        );
        self.runtime.handle_step_delivery(job, attempt).instrument(span).await
    }
}

impl<Q, T, P, C> PlanQueueRuntime<Q, T, P, C>
where
    Q: QueueAdapter,
    T: ToolAgentClient,
    P: PolicyEnforcer,
    C: Clock,
{
    pub(crate) async fn handle_step_delivery(
        &self,
        job: PlanJob,
        attempt: u32,
    ) -> Disposition {
        let key = job.idempotency_key();
        if !self.registry.begin_delivery(&job, attempt) {
            tracing::debug!("duplicate delivery already in flight, acking");
            return Disposition::Ack;
        }
        let disposition = self.run_step(&job, attempt).await;
        self.registry.end_delivery(&key);
        self.refresh_queue_depth().await;
        disposition
    }

    async fn run_step(&self, job: &PlanJob, attempt: u32) -> Disposition {
        // Completed-index gate: a replay of an already-finished step is
        // dropped here, which is what makes crash replays safe.
        let key = job.idempotency_key();
        let step_index = match self.store.get_plan_metadata(&job.plan_id).await {
            Ok(Some(metadata)) => match metadata.step_index(&job.step.id) {
                Some(index) if metadata.index_completed(index) => {
                    tracing::debug!("step already completed, acking replay");
                    self.registry.remove(&key);
                    self.approvals.remove(&key);
                    return Disposition::Ack;
                }
                Some(index) => index,
                None => {
                    tracing::warn!("step not present in plan metadata, acking");
                    return Disposition::Ack;
                }
            },
            Ok(None) => {
                tracing::debug!("plan metadata gone (plan finished), acking");
                self.registry.remove(&key);
                self.approvals.remove(&key);
                return Disposition::Ack;
            }
            Err(err) => {
                tracing::warn!(error = %err, "metadata read failed, redelivering");
                return Disposition::Retry { delay_ms: None };
            }
        };

        // Persisted-entry barrier: an equal-or-newer attempt already runs.
        match self.store.get_entry(&job.plan_id, &job.step.id).await {
            Ok(Some(entry))
                if entry.state == StepState::Running && entry.attempt >= attempt =>
            {
                tracing::debug!("entry already running at this attempt, acking");
                return Disposition::Ack;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "entry read failed, redelivering");
                return Disposition::Retry { delay_ms: None };
            }
        }

        let entry = match self.mark_running(job, attempt).await {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "failed to persist running state, redelivering");
                return Disposition::Retry { delay_ms: None };
            }
        };
        self.publish_event(PlanStepEvent::for_step(
            job.plan_id.clone(),
            &job.step,
            StepState::Running,
            attempt,
            job.trace_id.clone(),
            self.now(),
        ));

        // Defence in depth: policy ran at release, but approvals or policy
        // state may have moved while the message sat on the queue.
        let approvals = match self.load_approvals(&job.plan_id, &job.step.id).await {
            Ok(approvals) => approvals,
            Err(err) => {
                tracing::warn!(error = %err, "approval load failed, redelivering");
                return Disposition::Retry { delay_ms: None };
            }
        };
        let subject = entry.subject.clone().or_else(|| self.subjects.get(&job.plan_id));
        let ctx = self.policy_context(&job.plan_id, &job.trace_id, approvals, subject);
        let decision = self.policy.enforce_plan_step(&job.step, &ctx).await;
        if decision.is_blocked() {
            let summary = decision.blocking_summary();
            self.audit.record(
                AuditRecord::now(
                    AuditAction::PolicyDenied,
                    job.plan_id.clone(),
                    job.step.id.clone(),
                    job.step.capability.clone(),
                )
                .detail(summary.clone()),
            );
            let event = PlanStepEvent::for_entry(&entry, StepState::Rejected, self.now())
                .summary(summary);
            self.publish_event(event);
            self.finish_terminal(job, StepState::Rejected).await;
            return Disposition::Ack;
        }

        let request = ToolRequest::for_step(job.plan_id.clone(), &job.step);
        let opts = ToolCallOptions {
            timeout: Duration::from_millis(job.step.timeout_seconds.saturating_mul(1_000)),
            trace_id: job.trace_id.clone(),
        };
        match execute_with_deadline(&self.tools, request, opts).await {
            Ok(events) => self.settle_tool_events(job, attempt, step_index, &entry, events).await,
            Err(err) if err.retryable => self.settle_retryable(job, attempt, err).await,
            Err(err) => {
                let event = PlanStepEvent::for_entry(&entry, StepState::Failed, self.now())
                    .summary(err.message.clone());
                self.publish_event(event);
                self.finish_terminal(job, StepState::Failed).await;
                Disposition::Ack
            }
        }
    }

    /// Republish the tool's events, settle on the terminal outcome (last
    /// terminal event, else completed), and advance the plan.
    async fn settle_tool_events(
        &self,
        job: &PlanJob,
        attempt: u32,
        step_index: usize,
        entry: &PlanStepEntry,
        events: Vec<ToolEvent>,
    ) -> Disposition {
        let mut last_terminal: Option<ToolEvent> = None;
        for tool_event in events {
            let mut event = PlanStepEvent::for_step(
                job.plan_id.clone(),
                &job.step,
                tool_event.state,
                attempt,
                job.trace_id.clone(),
                self.now(),
            );
            event.summary = tool_event.summary.clone();
            event.output = tool_event.output.clone();
            self.publish_event(event);
            if tool_event.state.is_terminal() {
                last_terminal = Some(tool_event);
            }
        }

        let outcome = last_terminal.as_ref().map(|e| e.state).unwrap_or(StepState::Completed);
        if outcome != StepState::Completed {
            // The tool itself reported a terminal failure; its event was
            // already republished above.
            self.finish_terminal(job, outcome).await;
            return Disposition::Ack;
        }

        if last_terminal.is_none() {
            // The tool produced no terminal event; the runtime owns the
            // completion record.
            self.publish_event(PlanStepEvent::for_entry(entry, StepState::Completed, self.now()));
        }

        if let Err(err) = self.cleanup_step(&job.plan_id, &job.step.id).await {
            tracing::warn!(error = %err, "cleanup failed after completion, redelivering");
            return Disposition::Retry { delay_ms: None };
        }
        if let Err(err) = self.advance_and_release(&job.plan_id, step_index).await {
            // The completion is durable; releasing the successor failed and
            // surfaced its own events. Nothing left to redeliver for this
            // message.
            tracing::warn!(error = %err, "release after completion failed");
        }
        self.record_terminal_metric(StepState::Completed);
        Disposition::Ack
    }

    async fn settle_retryable(&self, job: &PlanJob, attempt: u32, err: ToolError) -> Disposition {
        if attempt < self.config.retry_max {
            self.publish_event(
                PlanStepEvent::for_step(
                    job.plan_id.clone(),
                    &job.step,
                    StepState::Retrying,
                    attempt,
                    job.trace_id.clone(),
                    self.now(),
                )
                .summary(err.message.clone()),
            );

            let next_attempt = attempt + 1;
            self.registry.set_attempt(&job.idempotency_key(), next_attempt);
            if let Err(store_err) = self
                .store
                .set_state(
                    &job.plan_id,
                    &job.step.id,
                    StateUpdate::to(StepState::Queued)
                        .attempt(next_attempt)
                        .summary(err.message.clone()),
                )
                .await
            {
                tracing::warn!(error = %store_err, "failed to persist retry state, redelivering");
                return Disposition::Retry { delay_ms: None };
            }
            self.publish_event(PlanStepEvent::for_step(
                job.plan_id.clone(),
                &job.step,
                StepState::Queued,
                next_attempt,
                job.trace_id.clone(),
                self.now(),
            ));
            self.metrics.record_retry();

            let delay_ms =
                self.config.retry_backoff_ms.map(|base| backoff_delay_ms(base, attempt));
            tracing::info!(
                error = %err,
                next_attempt,
                delay_ms = delay_ms.unwrap_or(0),
                "retryable tool failure, requeueing"
            );
            Disposition::Retry { delay_ms }
        } else {
            let reason = format!("Retries exhausted after {attempt} attempts: {}", err.message);
            self.publish_event(
                PlanStepEvent::for_step(
                    job.plan_id.clone(),
                    &job.step,
                    StepState::DeadLettered,
                    attempt,
                    job.trace_id.clone(),
                    self.now(),
                )
                .summary(reason.clone()),
            );
            self.finish_terminal(job, StepState::DeadLettered).await;
            Disposition::DeadLetter { reason }
        }
    }

    /// Common tail for a terminal non-completion outcome: drop the entry
    /// and caches, halt the chain, count the metric.
    async fn finish_terminal(&self, job: &PlanJob, state: StepState) {
        if let Err(err) = self.cleanup_step(&job.plan_id, &job.step.id).await {
            tracing::warn!(error = %err, "entry cleanup failed on terminal outcome");
        }
        if let Err(err) = self.halt_plan(&job.plan_id).await {
            tracing::warn!(error = %err, "plan halt failed on terminal outcome");
        }
        self.record_terminal_metric(state);
    }

    /// Upsert the entry into `running` at this attempt.
    async fn mark_running(
        &self,
        job: &PlanJob,
        attempt: u32,
    ) -> Result<PlanStepEntry, RuntimeError> {
        let now = self.now();
        match self.store.get_entry(&job.plan_id, &job.step.id).await? {
            Some(mut entry) => {
                self.store
                    .set_state(
                        &job.plan_id,
                        &job.step.id,
                        StateUpdate::to(StepState::Running).attempt(attempt),
                    )
                    .await?;
                entry.state = StepState::Running;
                entry.attempt = attempt;
                entry.updated_at_ms = now;
                Ok(entry)
            }
            None => {
                // Registry and store both lag the queue (crash between
                // enqueue and persist); rebuild the entry from the job.
                let entry = PlanStepEntry {
                    plan_id: job.plan_id.clone(),
                    step_id: job.step.id.clone(),
                    step: job.step.clone(),
                    trace_id: job.trace_id.clone(),
                    state: StepState::Running,
                    attempt,
                    created_at_ms: job.created_at_ms,
                    updated_at_ms: now,
                    summary: None,
                    output: None,
                    approvals: Default::default(),
                    subject: job.subject.clone(),
                };
                self.store.remember_step(entry.clone()).await?;
                Ok(entry)
            }
        }
    }
}
