// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable fakes for tests.
//!
//! `FakeToolAgent` replays per-step outcome scripts and records every call;
//! `FakePolicy` applies declarative deny rules; `MemoryAuditSink` collects
//! records for assertions. All are cheap clones sharing state, so a test
//! can keep a handle while the runtime owns another.

use crate::audit::{AuditRecord, AuditSink};
use crate::policy::{Decision, DenyReason, PolicyContext, PolicyEnforcer};
use crate::tool::{ToolAgentClient, ToolCallOptions, ToolError, ToolEvent, ToolRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use pq_core::{step_key, PlanId, PlanStep, StepId, TraceId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// A recorded `execute_tool` call.
#[derive(Debug, Clone)]
pub struct RecordedToolCall {
    pub request: ToolRequest,
    pub trace_id: TraceId,
    pub timeout: Duration,
}

#[derive(Default)]
struct FakeToolInner {
    /// step key → queued outcomes, consumed one per call
    scripts: HashMap<String, VecDeque<Result<Vec<ToolEvent>, ToolError>>>,
    calls: Vec<RecordedToolCall>,
}

/// Tool agent replaying scripted outcomes.
///
/// An exhausted (or missing) script yields a plain completion, so happy-path
/// tests need no setup.
#[derive(Clone, Default)]
pub struct FakeToolAgent {
    inner: Arc<Mutex<FakeToolInner>>,
}

impl FakeToolAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, plan_id: &PlanId, step_id: &StepId, outcome: Result<Vec<ToolEvent>, ToolError>) {
        self.inner
            .lock()
            .scripts
            .entry(step_key(plan_id, step_id))
            .or_default()
            .push_back(outcome);
    }

    /// Queue a successful invocation returning `events`.
    pub fn script_events(&self, plan_id: &PlanId, step_id: &StepId, events: Vec<ToolEvent>) {
        self.push(plan_id, step_id, Ok(events));
    }

    /// Queue a retryable failure.
    pub fn script_retryable(&self, plan_id: &PlanId, step_id: &StepId, message: &str) {
        self.push(plan_id, step_id, Err(ToolError::retryable(message)));
    }

    /// Queue a terminal failure.
    pub fn script_terminal(&self, plan_id: &PlanId, step_id: &StepId, message: &str) {
        self.push(plan_id, step_id, Err(ToolError::terminal(message)));
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<RecordedToolCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of invocations for one step.
    pub fn call_count(&self, plan_id: &PlanId, step_id: &StepId) -> usize {
        let key = step_key(plan_id, step_id);
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| step_key(&c.request.plan_id, &c.request.step_id) == key)
            .count()
    }
}

#[async_trait]
impl ToolAgentClient for FakeToolAgent {
    async fn execute_tool(
        &self,
        request: ToolRequest,
        opts: ToolCallOptions,
    ) -> Result<Vec<ToolEvent>, ToolError> {
        let mut inner = self.inner.lock();
        inner.calls.push(RecordedToolCall {
            request: request.clone(),
            trace_id: opts.trace_id.clone(),
            timeout: opts.timeout,
        });
        let key = step_key(&request.plan_id, &request.step_id);
        match inner.scripts.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(outcome) => outcome,
            None => Ok(vec![ToolEvent::completed()]),
        }
    }
}

#[derive(Default)]
struct FakePolicyInner {
    /// capability → deny reason
    denied: HashMap<String, String>,
    /// capabilities the policy itself gates behind approval
    approval_required: HashSet<String>,
    enforce_calls: u32,
}

/// Declarative policy fake.
#[derive(Clone, Default)]
pub struct FakePolicy {
    inner: Arc<Mutex<FakePolicyInner>>,
}

impl FakePolicy {
    /// Allow-everything policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny any step consuming `capability`, with the given reason.
    pub fn deny_capability(&self, capability: &str, reason: &str) {
        self.inner.lock().denied.insert(capability.to_string(), reason.to_string());
    }

    /// Clear a previous deny rule.
    pub fn allow_capability(&self, capability: &str) {
        self.inner.lock().denied.remove(capability);
    }

    /// Gate `capability` behind an approval at the policy layer.
    pub fn require_approval(&self, capability: &str) {
        self.inner.lock().approval_required.insert(capability.to_string());
    }

    pub fn enforce_calls(&self) -> u32 {
        self.inner.lock().enforce_calls
    }
}

#[async_trait]
impl PolicyEnforcer for FakePolicy {
    async fn enforce_plan_step(&self, step: &PlanStep, ctx: &PolicyContext) -> Decision {
        let mut inner = self.inner.lock();
        inner.enforce_calls += 1;

        if let Some(reason) = inner.denied.get(&step.capability) {
            return Decision::deny(vec![DenyReason::for_capability(
                reason.clone(),
                step.capability.clone(),
            )]);
        }
        let granted = ctx.approvals.get(&step.capability).copied().unwrap_or(false);
        if inner.approval_required.contains(&step.capability) && !granted {
            return Decision::deny(vec![DenyReason::approval_required(step.capability.clone())]);
        }
        Decision::allow()
    }
}

/// Audit sink collecting records in memory.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
