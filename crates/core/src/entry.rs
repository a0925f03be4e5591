// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted per-step entries and per-plan metadata.

use crate::id::{PlanId, StepId, TraceId};
use crate::plan::PlanStep;
use crate::state::StepState;
use crate::subject::PlanSubject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `last_completed_index` value before any step of a plan has completed.
pub const NO_STEP_COMPLETED: i64 = -1;

/// Durable record of one live (non-terminal) step.
///
/// Exists in the state store exactly while the step is non-terminal; deleted
/// on every terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepEntry {
    pub plan_id: PlanId,
    pub step_id: StepId,
    /// Snapshot of the step at submission time
    pub step: PlanStep,
    pub trace_id: TraceId,
    pub state: StepState,
    /// 0-based delivery attempt
    pub attempt: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// capability → granted
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub approvals: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<PlanSubject>,
}

impl PlanStepEntry {
    /// True when the step's capability has a recorded grant.
    pub fn capability_approved(&self) -> bool {
        self.approvals.get(&self.step.capability).copied().unwrap_or(false)
    }
}

/// One element of [`PlanMetadata::steps`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStepSlot {
    pub step: PlanStep,
    #[serde(default)]
    pub attempt: u32,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<PlanSubject>,
}

/// Durable per-plan scheduling state.
///
/// Invariant: `0 ≤ last_completed_index + 1 ≤ next_step_index ≤ steps.len()`.
/// Deleted once every step has completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub plan_id: PlanId,
    pub trace_id: TraceId,
    pub steps: Vec<PlanStepSlot>,
    /// Index of the next step eligible for release
    pub next_step_index: usize,
    /// Highest index successfully completed; [`NO_STEP_COMPLETED`] initially
    pub last_completed_index: i64,
}

impl PlanMetadata {
    /// Fresh metadata for a newly submitted plan.
    pub fn new(
        plan_id: PlanId,
        trace_id: TraceId,
        steps: Vec<PlanStepSlot>,
    ) -> Self {
        Self {
            plan_id,
            trace_id,
            steps,
            next_step_index: 0,
            last_completed_index: NO_STEP_COMPLETED,
        }
    }

    /// Index of a step within the plan, by id.
    pub fn step_index(&self, step_id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.step.id == *step_id)
    }

    /// True once the final step has completed.
    pub fn is_complete(&self) -> bool {
        self.last_completed_index + 1 == self.steps.len() as i64
    }

    /// True when the given index is already covered by `last_completed_index`.
    pub fn index_completed(&self, index: usize) -> bool {
        (index as i64) <= self.last_completed_index
    }

    /// Record completion of the step at `index`, advancing both pointers
    /// monotonically.
    pub fn mark_completed(&mut self, index: usize) {
        self.last_completed_index = self.last_completed_index.max(index as i64);
        self.next_step_index = self.next_step_index.max(index + 1);
    }

    /// Check the metadata pointer invariant.
    pub fn pointers_valid(&self) -> bool {
        let completed_next = self.last_completed_index + 1;
        0 <= completed_next
            && completed_next <= self.next_step_index as i64
            && self.next_step_index <= self.steps.len()
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
