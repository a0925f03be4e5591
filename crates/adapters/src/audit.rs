// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit sink.
//!
//! Every policy deny and every approval resolution produces one record.
//! The sink is a passive collaborator; the default implementation forwards
//! to `tracing` under the `audit` target.

use chrono::{DateTime, Utc};
use pq_core::{PlanId, StepId};
use serde::{Deserialize, Serialize};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PolicyDenied,
    ApprovalGranted,
    ApprovalRejected,
}

pq_core::simple_display! {
    AuditAction {
        PolicyDenied => "policy_denied",
        ApprovalGranted => "approval_granted",
        ApprovalRejected => "approval_rejected",
    }
}

/// One audit trail record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub plan_id: PlanId,
    pub step_id: StepId,
    pub capability: String,
    /// Deny reasons or approval rationale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Acting or affected user, when a subject is attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AuditRecord {
    pub fn now(
        action: AuditAction,
        plan_id: PlanId,
        step_id: StepId,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            action,
            plan_id,
            step_id,
            capability: capability.into(),
            detail: None,
            user_id: None,
        }
    }

    pq_core::setters! {
        option {
            detail: String,
            user_id: String,
        }
    }
}

/// Receiver for audit records. Implementations must not block.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, record: AuditRecord);
}

/// Default sink: structured log lines under the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        tracing::info!(
            target: "audit",
            action = %record.action,
            plan_id = %record.plan_id,
            step_id = %record.step_id,
            capability = %record.capability,
            detail = record.detail.as_deref().unwrap_or(""),
            user_id = record.user_id.as_deref().unwrap_or(""),
            "audit"
        );
    }
}
