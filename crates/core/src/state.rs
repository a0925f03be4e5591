// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step state machine.

use serde::{Deserialize, Serialize};

/// State of a single plan step as it moves through the queue.
///
/// Terminal states (`Completed`, `Failed`, `Rejected`, `DeadLettered`) end
/// the step's lifecycle: the persisted entry is deleted and no further
/// events are published for the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Released onto the step queue, awaiting delivery
    Queued,
    /// Blocked on a human approval for the step's capability
    WaitingApproval,
    /// A consumer is executing the step's tool
    Running,
    /// A retryable failure occurred; the broker will redeliver
    Retrying,
    /// Approval granted; release is about to re-enqueue
    Approved,
    /// Step finished successfully
    Completed,
    /// Step failed terminally
    Failed,
    /// Step was rejected by policy or by a human decision
    Rejected,
    /// Retries exhausted; message moved to the dead-letter queue
    DeadLettered,
}

impl StepState {
    /// Check if this state ends the step's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed
                | StepState::Failed
                | StepState::Rejected
                | StepState::DeadLettered
        )
    }

    /// States that occupy the plan's single execution slot.
    ///
    /// At most one step per plan may be in one of these at a time.
    pub fn is_active(&self) -> bool {
        matches!(self, StepState::Queued | StepState::Running | StepState::Retrying)
    }
}

crate::simple_display! {
    StepState {
        Queued => "queued",
        WaitingApproval => "waiting_approval",
        Running => "running",
        Retrying => "retrying",
        Approved => "approved",
        Completed => "completed",
        Failed => "failed",
        Rejected => "rejected",
        DeadLettered => "dead_lettered",
    }
}

/// A human decision on an approval gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

impl ApprovalDecision {
    pub fn approved() -> Self {
        Self::Approved { rationale: None }
    }

    pub fn rejected() -> Self {
        Self::Rejected { rationale: None }
    }

    pub fn approved_because(rationale: impl Into<String>) -> Self {
        Self::Approved { rationale: Some(rationale.into()) }
    }

    pub fn rejected_because(rationale: impl Into<String>) -> Self {
        Self::Rejected { rationale: Some(rationale.into()) }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    pub fn rationale(&self) -> Option<&str> {
        match self {
            Self::Approved { rationale } | Self::Rejected { rationale } => rationale.as_deref(),
        }
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Approved { .. } => "approved",
            Self::Rejected { .. } => "rejected",
        })
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
