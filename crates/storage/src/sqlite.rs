// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Relational state store on SQLite.
//!
//! Records are stored as JSON documents in two tables keyed the same way as
//! the file backend (`step/{planId}/{stepId}`, `plan/{planId}`).
//! Read-modify-write cycles run inside a transaction.

use crate::store::{PlanStateStore, StateStoreError, StateUpdate, StoreOptions};
use async_trait::async_trait;
use pq_core::{Clock, PlanId, PlanMetadata, PlanStepEntry, StepId, SystemClock};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS plan_step_entries (
    plan_id       TEXT NOT NULL,
    step_id       TEXT NOT NULL,
    record        TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (plan_id, step_id)
);
CREATE TABLE IF NOT EXISTS plan_metadata (
    plan_id       TEXT PRIMARY KEY,
    record        TEXT NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
";

/// State store on a SQLite database.
pub struct SqliteStateStore<C: Clock = SystemClock> {
    pool: SqlitePool,
    options: StoreOptions,
    clock: C,
}

impl SqliteStateStore<SystemClock> {
    /// Connect and apply the schema. `url` is a sqlx SQLite URL, e.g.
    /// `sqlite:plan-state.db?mode=rwc` or `sqlite::memory:`.
    pub async fn connect(url: &str, options: StoreOptions) -> Result<Self, StateStoreError> {
        Self::connect_with_clock(url, options, SystemClock).await
    }
}

impl<C: Clock> SqliteStateStore<C> {
    pub async fn connect_with_clock(
        url: &str,
        options: StoreOptions,
        clock: C,
    ) -> Result<Self, StateStoreError> {
        // One connection: in-memory databases exist per connection, and the
        // runtime's access pattern is low-volume point reads/writes.
        let pool = SqlitePoolOptions::new().max_connections(1).connect(url).await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool, options, clock })
    }

    async fn load_entry(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<Option<PlanStepEntry>, StateStoreError> {
        let row = sqlx::query(
            "SELECT record FROM plan_step_entries WHERE plan_id = ?1 AND step_id = ?2",
        )
        .bind(plan_id.as_str())
        .bind(step_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let record: String = row.try_get("record")?;
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write one entry inside a transaction. A no-op when the
    /// entry is absent.
    async fn mutate_entry<F>(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        mutate: F,
    ) -> Result<(), StateStoreError>
    where
        F: FnOnce(&mut PlanStepEntry) + Send,
    {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT record FROM plan_step_entries WHERE plan_id = ?1 AND step_id = ?2",
        )
        .bind(plan_id.as_str())
        .bind(step_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(());
        };
        let record: String = row.try_get("record")?;
        let mut entry: PlanStepEntry = serde_json::from_str(&record)?;
        mutate(&mut entry);
        entry.updated_at_ms = self.clock.epoch_ms();
        sqlx::query(
            "UPDATE plan_step_entries SET record = ?3, updated_at_ms = ?4 \
             WHERE plan_id = ?1 AND step_id = ?2",
        )
        .bind(plan_id.as_str())
        .bind(step_id.as_str())
        .bind(serde_json::to_string(&entry)?)
        .bind(entry.updated_at_ms as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> PlanStateStore for SqliteStateStore<C> {
    async fn remember_step(&self, mut entry: PlanStepEntry) -> Result<(), StateStoreError> {
        if !self.options.capture_output {
            entry.output = None;
        }
        sqlx::query(
            "INSERT OR IGNORE INTO plan_step_entries (plan_id, step_id, record, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(entry.plan_id.as_str())
        .bind(entry.step_id.as_str())
        .bind(serde_json::to_string(&entry)?)
        .bind(entry.updated_at_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_entry(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<Option<PlanStepEntry>, StateStoreError> {
        self.load_entry(plan_id, step_id).await
    }

    async fn set_state(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        update: StateUpdate,
    ) -> Result<(), StateStoreError> {
        let capture_output = self.options.capture_output;
        self.mutate_entry(plan_id, step_id, move |entry| {
            if let Some(state) = update.state {
                entry.state = state;
            }
            if let Some(summary) = update.summary {
                entry.summary = Some(summary);
            }
            if let Some(output) = update.output {
                if capture_output {
                    entry.output = Some(output);
                }
            }
            if let Some(attempt) = update.attempt {
                entry.attempt = attempt;
            }
        })
        .await
    }

    async fn record_approval(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        capability: &str,
        granted: bool,
    ) -> Result<(), StateStoreError> {
        let capability = capability.to_string();
        self.mutate_entry(plan_id, step_id, move |entry| {
            entry.approvals.insert(capability, granted);
        })
        .await
    }

    async fn forget_step(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<(), StateStoreError> {
        sqlx::query("DELETE FROM plan_step_entries WHERE plan_id = ?1 AND step_id = ?2")
            .bind(plan_id.as_str())
            .bind(step_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active_steps(&self) -> Result<Vec<PlanStepEntry>, StateStoreError> {
        let rows =
            sqlx::query("SELECT record FROM plan_step_entries ORDER BY plan_id, step_id")
                .fetch_all(&self.pool)
                .await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.try_get("record")?;
            entries.push(serde_json::from_str(&record)?);
        }
        Ok(entries)
    }

    async fn remember_plan_metadata(&self, metadata: PlanMetadata) -> Result<(), StateStoreError> {
        sqlx::query(
            "INSERT INTO plan_metadata (plan_id, record, updated_at_ms) VALUES (?1, ?2, ?3) \
             ON CONFLICT(plan_id) DO UPDATE SET \
                 record = excluded.record, updated_at_ms = excluded.updated_at_ms",
        )
        .bind(metadata.plan_id.as_str())
        .bind(serde_json::to_string(&metadata)?)
        .bind(self.clock.epoch_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_plan_metadata(
        &self,
        plan_id: &PlanId,
    ) -> Result<Option<PlanMetadata>, StateStoreError> {
        let row = sqlx::query("SELECT record FROM plan_metadata WHERE plan_id = ?1")
            .bind(plan_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let record: String = row.try_get("record")?;
                Ok(Some(serde_json::from_str(&record)?))
            }
            None => Ok(None),
        }
    }

    async fn forget_plan_metadata(&self, plan_id: &PlanId) -> Result<(), StateStoreError> {
        sqlx::query("DELETE FROM plan_metadata WHERE plan_id = ?1")
            .bind(plan_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_plan_metadata(&self) -> Result<Vec<PlanMetadata>, StateStoreError> {
        let rows = sqlx::query("SELECT record FROM plan_metadata ORDER BY plan_id")
            .fetch_all(&self.pool)
            .await?;
        let mut plans = Vec::with_capacity(rows.len());
        for row in rows {
            let record: String = row.try_get("record")?;
            plans.push(serde_json::from_str(&record)?);
        }
        Ok(plans)
    }

    async fn sweep_expired(&self, cutoff_ms: u64) -> Result<u64, StateStoreError> {
        let result = sqlx::query("DELETE FROM plan_step_entries WHERE updated_at_ms < ?1")
            .bind(cutoff_ms as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
