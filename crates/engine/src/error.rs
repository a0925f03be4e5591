// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime error taxonomy.
//!
//! API boundaries (`submit_plan`, `resolve_approval`) surface these to the
//! gateway; consumer handlers never raise past the broker, they turn
//! failures into dispositions and terminal events.

use pq_adapters::DenyReason;
use pq_core::{PlanId, StepId};
use pq_queue::QueueError;
use pq_storage::StateStoreError;
use thiserror::Error;

/// Errors surfaced by the runtime's public API
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime not initialized")]
    NotInitialized,

    /// Idempotent-submit guard: the plan id already has live state.
    #[error("plan '{0}' already submitted")]
    PlanExists(PlanId),

    /// Structured policy denial, propagated untouched to the caller.
    #[error("policy denied: {}", format_deny(.0))]
    PolicyDenied(Vec<DenyReason>),

    /// Approval targeted a step that is terminal or unknown.
    #[error("step '{step_id}' of plan '{plan_id}' is not available for approval")]
    StepUnavailable { plan_id: PlanId, step_id: StepId },

    #[error("state store error: {0}")]
    Persistence(#[from] StateStoreError),

    #[error("queue error: {0}")]
    Enqueue(#[from] QueueError),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Shutdown interrupted the operation; callers treat this as silence.
    #[error("runtime shutting down")]
    Cancelled,
}

fn format_deny(reasons: &[DenyReason]) -> String {
    reasons.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
