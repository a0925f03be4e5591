// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State store contract.

use async_trait::async_trait;
use pq_core::{PlanId, PlanMetadata, PlanStepEntry, StepId, StepState};
use thiserror::Error;

/// Errors from state store operations
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Store construction options shared by both backends.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// When false, `output` values are never written; writes carrying one
    /// are silently stripped.
    pub capture_output: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { capture_output: true }
    }
}

/// Partial update applied to an existing entry by [`PlanStateStore::set_state`].
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub state: Option<StepState>,
    pub summary: Option<String>,
    pub output: Option<serde_json::Value>,
    pub attempt: Option<u32>,
}

impl StateUpdate {
    /// Update carrying only a state transition.
    pub fn to(state: StepState) -> Self {
        Self { state: Some(state), ..Self::default() }
    }

    pq_core::setters! {
        option {
            summary: String,
            output: serde_json::Value,
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Durable key-value store of per-step entries and per-plan metadata.
///
/// Key families: `step/{planId}/{stepId}` and `plan/{planId}`. Every
/// operation is atomic per key; read-modify-write cycles never observe a
/// torn record.
#[async_trait]
pub trait PlanStateStore: Send + Sync + 'static {
    /// Idempotent insert: an existing entry for the same key is left as-is.
    async fn remember_step(&self, entry: PlanStepEntry) -> Result<(), StateStoreError>;

    async fn get_entry(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<Option<PlanStepEntry>, StateStoreError>;

    /// Merge `update` into an existing entry. Silently a no-op when the
    /// entry is absent (the step went terminal concurrently).
    async fn set_state(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        update: StateUpdate,
    ) -> Result<(), StateStoreError>;

    /// Atomic merge of one capability grant into the entry's approvals map.
    async fn record_approval(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        capability: &str,
        granted: bool,
    ) -> Result<(), StateStoreError>;

    async fn forget_step(&self, plan_id: &PlanId, step_id: &StepId)
        -> Result<(), StateStoreError>;

    /// All live entries; cold-start replay source.
    async fn list_active_steps(&self) -> Result<Vec<PlanStepEntry>, StateStoreError>;

    /// Upsert plan metadata.
    async fn remember_plan_metadata(&self, metadata: PlanMetadata) -> Result<(), StateStoreError>;

    async fn get_plan_metadata(
        &self,
        plan_id: &PlanId,
    ) -> Result<Option<PlanMetadata>, StateStoreError>;

    async fn forget_plan_metadata(&self, plan_id: &PlanId) -> Result<(), StateStoreError>;

    async fn list_plan_metadata(&self) -> Result<Vec<PlanMetadata>, StateStoreError>;

    /// Purge step entries not touched since `cutoff_ms`. Runs off the hot
    /// path; returns the number of purged entries.
    async fn sweep_expired(&self, cutoff_ms: u64) -> Result<u64, StateStoreError>;
}
