// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan and step value objects.

use crate::id::{PlanId, StepId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A totally-ordered sequence of steps describing an automation goal.
///
/// Immutable after submission; the runtime snapshots steps into persisted
/// entries and queue payloads rather than re-reading the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub goal: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Index of a step within the plan, by id.
    pub fn step_index(&self, step_id: &StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == *step_id)
    }
}

/// A single tool invocation with a capability requirement and optional
/// approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable step identifier, unique within the plan
    pub id: StepId,
    /// Human-readable action name (shown in UIs)
    pub action: String,
    /// Tool to dispatch the step to
    pub tool: String,
    /// Capability token consumed by the policy engine
    pub capability: String,
    /// Human-readable label for the capability
    #[serde(default)]
    pub capability_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub approval_required: bool,
    /// Free-form tool input
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input: HashMap<String, serde_json::Value>,
    /// Free-form annotations carried through events
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

crate::builder! {
    pub struct PlanStepBuilder => PlanStep {
        into {
            id: StepId = "step-1",
            action: String = "test action",
            tool: String = "test-tool",
            capability: String = "test.capability",
            capability_label: String = "Test capability",
        }
        set {
            labels: Vec<String> = Vec::new(),
            timeout_seconds: u64 = 30,
            approval_required: bool = false,
            input: HashMap<String, serde_json::Value> = HashMap::new(),
            metadata: HashMap<String, serde_json::Value> = HashMap::new(),
        }
    }
}

crate::builder! {
    pub struct PlanBuilder => Plan {
        into {
            id: PlanId = "plan-1",
            goal: String = "test goal",
        }
        set {
            steps: Vec<PlanStep> = Vec::new(),
        }
    }
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
