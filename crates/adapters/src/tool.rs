// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-agent client contract.
//!
//! `execute_tool` is the whole surface: one invocation in, an ordered batch
//! of tool events out. A streaming transport is free to implement the trait
//! by materializing its stream; the runtime republishes events in the
//! order they appear in the returned vector.

use async_trait::async_trait;
use pq_core::{InvocationId, PlanId, PlanStep, StepId, StepState, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// One tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub invocation_id: InvocationId,
    pub plan_id: PlanId,
    pub step_id: StepId,
    pub tool: String,
    pub capability: String,
    pub capability_label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolRequest {
    /// Build a request from a step snapshot with a fresh invocation id.
    pub fn for_step(plan_id: PlanId, step: &PlanStep) -> Self {
        Self {
            invocation_id: InvocationId::generate(),
            plan_id,
            step_id: step.id.clone(),
            tool: step.tool.clone(),
            capability: step.capability.clone(),
            capability_label: step.capability_label.clone(),
            labels: step.labels.clone(),
            timeout_seconds: step.timeout_seconds,
            approval_required: step.approval_required,
            input: step.input.clone(),
            metadata: step.metadata.clone(),
        }
    }
}

/// Per-call options; the trace id rides the RPC metadata.
#[derive(Debug, Clone)]
pub struct ToolCallOptions {
    pub timeout: Duration,
    pub trace_id: TraceId,
}

/// One event reported by the tool agent during an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl ToolEvent {
    pub fn completed() -> Self {
        Self { state: StepState::Completed, summary: None, output: None }
    }

    pq_core::setters! {
        option {
            summary: String,
            output: serde_json::Value,
        }
    }
}

/// Errors from tool invocations. `retryable` drives the requeue decision.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

/// External gRPC stub executing tools on remote agents.
#[async_trait]
pub trait ToolAgentClient: Send + Sync + 'static {
    /// Execute one tool invocation and return its events in emission order.
    async fn execute_tool(
        &self,
        request: ToolRequest,
        opts: ToolCallOptions,
    ) -> Result<Vec<ToolEvent>, ToolError>;
}

/// Run `execute_tool` under the per-step deadline. Deadline expiry is a
/// retryable error.
pub async fn execute_with_deadline<T: ToolAgentClient + ?Sized>(
    client: &T,
    request: ToolRequest,
    opts: ToolCallOptions,
) -> Result<Vec<ToolEvent>, ToolError> {
    let timeout = opts.timeout;
    let tool = request.tool.clone();
    match tokio::time::timeout(timeout, client.execute_tool(request, opts)).await {
        Ok(result) => result,
        Err(_) => Err(ToolError::retryable(format!(
            "tool '{tool}' timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;
