// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Policy engine contract.

use async_trait::async_trait;
use pq_core::{PlanId, PlanStep, PlanSubject, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deny reason the runtime treats as "pending approval" rather than fatal.
pub const APPROVAL_REQUIRED_REASON: &str = "approval_required";

/// One structured deny entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyReason {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl DenyReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into(), capability: None }
    }

    pub fn for_capability(reason: impl Into<String>, capability: impl Into<String>) -> Self {
        Self { reason: reason.into(), capability: Some(capability.into()) }
    }

    pub fn approval_required(capability: impl Into<String>) -> Self {
        Self::for_capability(APPROVAL_REQUIRED_REASON, capability)
    }

    pub fn is_approval_required(&self) -> bool {
        self.reason == APPROVAL_REQUIRED_REASON
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.capability {
            Some(capability) => write!(f, "{} ({})", self.reason, capability),
            None => f.write_str(&self.reason),
        }
    }
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allow: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<DenyReason>,
}

impl Decision {
    pub fn allow() -> Self {
        Self { allow: true, deny: Vec::new() }
    }

    pub fn deny(reasons: Vec<DenyReason>) -> Self {
        Self { allow: false, deny: reasons }
    }

    /// Deny entries that actually block execution: everything except
    /// `approval_required`, which only parks the step behind its gate.
    pub fn blocking(&self) -> Vec<&DenyReason> {
        self.deny.iter().filter(|d| !d.is_approval_required()).collect()
    }

    pub fn is_blocked(&self) -> bool {
        !self.allow && !self.blocking().is_empty()
    }

    /// Human-readable digest of the blocking denials, for events and audit.
    pub fn blocking_summary(&self) -> String {
        let reasons: Vec<String> = self.blocking().iter().map(|d| d.to_string()).collect();
        format!("policy denied: {}", reasons.join("; "))
    }
}

/// Context handed to the policy engine alongside the step.
#[derive(Debug, Clone)]
pub struct PolicyContext {
    pub plan_id: PlanId,
    pub trace_id: TraceId,
    /// capability → granted, as accumulated for this step
    pub approvals: BTreeMap<String, bool>,
    pub subject: Option<PlanSubject>,
}

/// External policy engine.
///
/// Infallible by contract: implementations fold transport failures into a
/// deny so a broken policy service fails closed.
#[async_trait]
pub trait PolicyEnforcer: Send + Sync + 'static {
    async fn enforce_plan_step(&self, step: &PlanStep, ctx: &PolicyContext) -> Decision;
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
