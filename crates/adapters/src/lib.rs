// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pq-adapters: Seams to the runtime's external collaborators.
//!
//! The tool-agent RPC client, the policy engine, and the audit sink are
//! owned by other services; this crate defines the contracts the runtime
//! drives them through, plus scriptable fakes for tests.

mod audit;
#[cfg(any(test, feature = "test-support"))]
mod fake;
mod policy;
mod tool;

pub use audit::{AuditAction, AuditRecord, AuditSink, TracingAuditSink};
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakePolicy, FakeToolAgent, MemoryAuditSink, RecordedToolCall};
pub use policy::{
    Decision, DenyReason, PolicyContext, PolicyEnforcer, APPROVAL_REQUIRED_REASON,
};
pub use tool::{
    execute_with_deadline, ToolAgentClient, ToolCallOptions, ToolError, ToolEvent, ToolRequest,
};
