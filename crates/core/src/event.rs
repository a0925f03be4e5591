// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Published step events.

use crate::entry::PlanStepEntry;
use crate::id::{PlanId, StepId, TraceId};
use crate::plan::PlanStep;
use crate::state::StepState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Observable record of a step state change, published on the event bus and
/// relayed to SSE subscribers by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepEvent {
    pub plan_id: PlanId,
    pub step_id: StepId,
    pub state: StepState,
    pub capability: String,
    #[serde(default)]
    pub capability_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub tool: String,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approvals: Option<BTreeMap<String, bool>>,
    pub trace_id: TraceId,
    /// Epoch milliseconds at publication
    pub occurred_at_ms: u64,
}

impl PlanStepEvent {
    /// Build an event from a step snapshot. Summary, output, and approvals
    /// are attached with the [`setters!`](crate::setters)-generated methods.
    pub fn for_step(
        plan_id: PlanId,
        step: &PlanStep,
        state: StepState,
        attempt: u32,
        trace_id: TraceId,
        occurred_at_ms: u64,
    ) -> Self {
        Self {
            plan_id,
            step_id: step.id.clone(),
            state,
            capability: step.capability.clone(),
            capability_label: step.capability_label.clone(),
            labels: step.labels.clone(),
            tool: step.tool.clone(),
            timeout_seconds: step.timeout_seconds,
            approval_required: step.approval_required,
            attempt,
            summary: None,
            output: None,
            approvals: None,
            trace_id,
            occurred_at_ms,
        }
    }

    /// Build an event from a persisted entry, carrying its approvals map.
    pub fn for_entry(entry: &PlanStepEntry, state: StepState, occurred_at_ms: u64) -> Self {
        let mut event = Self::for_step(
            entry.plan_id.clone(),
            &entry.step,
            state,
            entry.attempt,
            entry.trace_id.clone(),
            occurred_at_ms,
        );
        event.summary = entry.summary.clone();
        event.output = entry.output.clone();
        if !entry.approvals.is_empty() {
            event.approvals = Some(entry.approvals.clone());
        }
        event
    }

    crate::setters! {
        option {
            summary: String,
            output: serde_json::Value,
            approvals: BTreeMap<String, bool>,
        }
    }

    /// Structural-equality dedup predicate: two events describe the same
    /// observation when state, summary, output, and timestamp all match.
    /// Output comparison is deep (`serde_json::Value` equality), never
    /// reference identity.
    pub fn same_observation(&self, other: &PlanStepEvent) -> bool {
        self.state == other.state
            && self.summary == other.summary
            && self.output == other.output
            && self.occurred_at_ms == other.occurred_at_ms
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
