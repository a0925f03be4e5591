// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-backed state store.
//!
//! Layout under the state root:
//!
//! ```text
//! step/{planId}/{stepId}.json
//! plan/{planId}.json
//! ```
//!
//! Identifier path segments are percent-encoded (ids are opaque and may
//! contain separators). Documents are written to a `.tmp` sibling and
//! renamed into place; a crash never leaves a torn record. A single store
//! mutex serializes read-modify-write cycles.

use crate::store::{PlanStateStore, StateStoreError, StateUpdate, StoreOptions};
use async_trait::async_trait;
use parking_lot::Mutex;
use pq_core::{Clock, PlanId, PlanMetadata, PlanStepEntry, StepId, SystemClock};
use std::fs;
use std::path::{Path, PathBuf};

/// Encode an opaque id into a safe single path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            _ => {
                out.push('%');
                out.push_str(&format!("{b:02x}"));
            }
        }
    }
    out
}

/// State store writing one JSON document per key.
pub struct FileStateStore<C: Clock = SystemClock> {
    root: PathBuf,
    options: StoreOptions,
    clock: C,
    /// Serializes read-modify-write cycles across keys
    lock: Mutex<()>,
}

impl FileStateStore<SystemClock> {
    pub fn new(root: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self::with_clock(root, options, SystemClock)
    }
}

impl<C: Clock> FileStateStore<C> {
    pub fn with_clock(root: impl Into<PathBuf>, options: StoreOptions, clock: C) -> Self {
        Self { root: root.into(), options, clock, lock: Mutex::new(()) }
    }

    fn step_path(&self, plan_id: &PlanId, step_id: &StepId) -> PathBuf {
        self.root
            .join("step")
            .join(encode_segment(plan_id.as_str()))
            .join(format!("{}.json", encode_segment(step_id.as_str())))
    }

    fn plan_path(&self, plan_id: &PlanId) -> PathBuf {
        self.root.join("plan").join(format!("{}.json", encode_segment(plan_id.as_str())))
    }

    fn write_document<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StateStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_document<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, StateStoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn remove_document(path: &Path) -> Result<(), StateStoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Parse every `.json` document under `dir` (one level of nesting for
    /// the step family). Unparseable documents are skipped with a warning;
    /// one bad record must not wedge cold-start replay.
    fn read_family<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<(PathBuf, T)>, StateStoreError> {
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for dirent in fs::read_dir(&current)? {
                let path = dirent?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|e| e == "json") {
                    match Self::read_document(&path) {
                        Ok(Some(value)) => out.push((path, value)),
                        Ok(None) => {}
                        Err(err) => tracing::warn!(
                            path = %path.display(),
                            error = %err,
                            "skipping unreadable state document"
                        ),
                    }
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl<C: Clock> PlanStateStore for FileStateStore<C> {
    async fn remember_step(&self, mut entry: PlanStepEntry) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock();
        let path = self.step_path(&entry.plan_id, &entry.step_id);
        if path.exists() {
            return Ok(());
        }
        if !self.options.capture_output {
            entry.output = None;
        }
        Self::write_document(&path, &entry)
    }

    async fn get_entry(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<Option<PlanStepEntry>, StateStoreError> {
        let _guard = self.lock.lock();
        Self::read_document(&self.step_path(plan_id, step_id))
    }

    async fn set_state(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        update: StateUpdate,
    ) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock();
        let path = self.step_path(plan_id, step_id);
        let Some(mut entry): Option<PlanStepEntry> = Self::read_document(&path)? else {
            return Ok(());
        };
        if let Some(state) = update.state {
            entry.state = state;
        }
        if let Some(summary) = update.summary {
            entry.summary = Some(summary);
        }
        if let Some(output) = update.output {
            if self.options.capture_output {
                entry.output = Some(output);
            }
        }
        if let Some(attempt) = update.attempt {
            entry.attempt = attempt;
        }
        entry.updated_at_ms = self.clock.epoch_ms();
        Self::write_document(&path, &entry)
    }

    async fn record_approval(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
        capability: &str,
        granted: bool,
    ) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock();
        let path = self.step_path(plan_id, step_id);
        let Some(mut entry): Option<PlanStepEntry> = Self::read_document(&path)? else {
            return Ok(());
        };
        entry.approvals.insert(capability.to_string(), granted);
        entry.updated_at_ms = self.clock.epoch_ms();
        Self::write_document(&path, &entry)
    }

    async fn forget_step(
        &self,
        plan_id: &PlanId,
        step_id: &StepId,
    ) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock();
        Self::remove_document(&self.step_path(plan_id, step_id))
    }

    async fn list_active_steps(&self) -> Result<Vec<PlanStepEntry>, StateStoreError> {
        let _guard = self.lock.lock();
        let mut entries: Vec<PlanStepEntry> = Self::read_family(&self.root.join("step"))?
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        entries.sort_by(|a, b| {
            (&a.plan_id, &a.step_id).cmp(&(&b.plan_id, &b.step_id))
        });
        Ok(entries)
    }

    async fn remember_plan_metadata(&self, metadata: PlanMetadata) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock();
        Self::write_document(&self.plan_path(&metadata.plan_id), &metadata)
    }

    async fn get_plan_metadata(
        &self,
        plan_id: &PlanId,
    ) -> Result<Option<PlanMetadata>, StateStoreError> {
        let _guard = self.lock.lock();
        Self::read_document(&self.plan_path(plan_id))
    }

    async fn forget_plan_metadata(&self, plan_id: &PlanId) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock();
        Self::remove_document(&self.plan_path(plan_id))
    }

    async fn list_plan_metadata(&self) -> Result<Vec<PlanMetadata>, StateStoreError> {
        let _guard = self.lock.lock();
        let mut plans: Vec<PlanMetadata> = Self::read_family(&self.root.join("plan"))?
            .into_iter()
            .map(|(_, m)| m)
            .collect();
        plans.sort_by(|a, b| a.plan_id.cmp(&b.plan_id));
        Ok(plans)
    }

    async fn sweep_expired(&self, cutoff_ms: u64) -> Result<u64, StateStoreError> {
        let _guard = self.lock.lock();
        let mut purged = 0;
        for (path, entry) in Self::read_family::<PlanStepEntry>(&self.root.join("step"))? {
            if entry.updated_at_ms < cutoff_ms {
                tracing::debug!(
                    plan_id = %entry.plan_id,
                    step_id = %entry.step_id,
                    "sweeping expired step entry"
                );
                Self::remove_document(&path)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
