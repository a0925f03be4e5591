// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue payloads.

use crate::id::{PlanId, StepId, TraceId};
use crate::plan::PlanStep;
use crate::state::StepState;
use crate::subject::PlanSubject;
use serde::{Deserialize, Serialize};

/// Header carried on every enqueued message.
pub const TRACE_ID_HEADER: &str = "trace-id";

/// Registry / idempotency key for a step: `"{planId}:{stepId}"`.
pub fn step_key(plan_id: &PlanId, step_id: &StepId) -> String {
    format!("{}:{}", plan_id, step_id)
}

/// Payload enqueued on `plan.steps`: one released step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanJob {
    pub plan_id: PlanId,
    pub step: PlanStep,
    /// 0-based delivery attempt at enqueue time
    #[serde(default)]
    pub attempt: u32,
    pub created_at_ms: u64,
    pub trace_id: TraceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<PlanSubject>,
}

impl PlanJob {
    /// Queue-adapter dedup key for this job.
    pub fn idempotency_key(&self) -> String {
        step_key(&self.plan_id, &self.step.id)
    }
}

/// Payload consumed from `plan.completions`: an externally reported step
/// outcome. Descriptive step fields (`tool`, `capability`, labels…) are
/// intentionally absent; the consumer merges them from the persisted entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletion {
    pub plan_id: PlanId,
    pub step_id: StepId,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub attempt: u32,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
