// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory caches and the per-plan lock manager.
//!
//! Everything here is a secondary index over the state store: populated on
//! release, rehydrated on cold start, and re-read from the store on any
//! disagreement. The per-plan locks are the exception: they are the
//! serialization primitive for metadata pointer updates and step release.

use parking_lot::Mutex;
use pq_core::{step_key, Clock, PlanId, PlanJob, PlanStep, PlanStepEntry, PlanSubject, TraceId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Cached view of one live step.
#[derive(Debug, Clone)]
pub(crate) struct RegistryEntry {
    pub step: PlanStep,
    pub trace_id: TraceId,
    pub attempt: u32,
    pub in_flight: bool,
    pub subject: Option<PlanSubject>,
}

/// Registry of live steps keyed by `"{planId}:{stepId}"`.
#[derive(Default)]
pub(crate) struct StepRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl StepRegistry {
    pub fn insert(&self, entry: &PlanStepEntry) {
        self.entries.lock().insert(
            step_key(&entry.plan_id, &entry.step_id),
            RegistryEntry {
                step: entry.step.clone(),
                trace_id: entry.trace_id.clone(),
                attempt: entry.attempt,
                in_flight: false,
                subject: entry.subject.clone(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<RegistryEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Check out a delivery. Returns false for a duplicate, meaning another
    /// delivery of an equal or higher attempt is already in flight.
    /// Otherwise marks the entry in flight (creating it from the job when
    /// the registry lags the store) and returns true.
    pub fn begin_delivery(&self, job: &PlanJob, attempt: u32) -> bool {
        let key = job.idempotency_key();
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(entry) => {
                if entry.in_flight && entry.attempt >= attempt {
                    return false;
                }
                entry.in_flight = true;
                entry.attempt = entry.attempt.max(attempt);
                true
            }
            None => {
                entries.insert(
                    key,
                    RegistryEntry {
                        step: job.step.clone(),
                        trace_id: job.trace_id.clone(),
                        attempt,
                        in_flight: true,
                        subject: job.subject.clone(),
                    },
                );
                true
            }
        }
    }

    /// Release the in-flight flag after the handler finishes.
    pub fn end_delivery(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.in_flight = false;
        }
    }

    /// Bump the cached attempt when a retry is scheduled.
    pub fn set_attempt(&self, key: &str, attempt: u32) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.attempt = attempt;
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Cache of per-step approvals, mirroring the persisted entries.
#[derive(Default)]
pub(crate) struct ApprovalCache {
    approvals: Mutex<HashMap<String, BTreeMap<String, bool>>>,
}

impl ApprovalCache {
    pub fn get(&self, key: &str) -> Option<BTreeMap<String, bool>> {
        self.approvals.lock().get(key).cloned()
    }

    pub fn set(&self, key: &str, approvals: BTreeMap<String, bool>) {
        self.approvals.lock().insert(key.to_string(), approvals);
    }

    pub fn remove(&self, key: &str) {
        self.approvals.lock().remove(key);
    }

    pub fn clear(&self) {
        self.approvals.lock().clear();
    }
}

/// Live and retained plan subjects.
///
/// A subject stays live while any step of its plan is live; when the plan
/// ends it moves to the retained side for the history window, then expires.
pub(crate) struct SubjectCache<C: Clock> {
    clock: C,
    retention_ms: u64,
    live: Mutex<HashMap<PlanId, PlanSubject>>,
    retained: Mutex<HashMap<PlanId, (PlanSubject, u64)>>,
}

impl<C: Clock> SubjectCache<C> {
    pub fn new(clock: C, retention_ms: u64) -> Self {
        Self {
            clock,
            retention_ms,
            live: Mutex::new(HashMap::new()),
            retained: Mutex::new(HashMap::new()),
        }
    }

    pub fn put_live(&self, plan_id: PlanId, subject: PlanSubject) {
        self.live.lock().insert(plan_id, subject);
    }

    pub fn remove(&self, plan_id: &PlanId) {
        self.live.lock().remove(plan_id);
        self.retained.lock().remove(plan_id);
    }

    /// Look up a subject: live first, then unexpired retained.
    pub fn get(&self, plan_id: &PlanId) -> Option<PlanSubject> {
        if let Some(subject) = self.live.lock().get(plan_id) {
            return Some(subject.clone());
        }
        let now = self.clock.epoch_ms();
        let mut retained = self.retained.lock();
        match retained.get(plan_id) {
            Some((subject, expires_at)) if *expires_at > now => Some(subject.clone()),
            Some(_) => {
                retained.remove(plan_id);
                None
            }
            None => None,
        }
    }

    /// Move a plan's subject from live to retained for the window.
    pub fn prune(&self, plan_id: &PlanId) {
        if let Some(subject) = self.live.lock().remove(plan_id) {
            let expires_at = self.clock.epoch_ms() + self.retention_ms;
            self.retained.lock().insert(plan_id.clone(), (subject, expires_at));
        }
    }

    /// Drop expired retained subjects.
    pub fn sweep(&self) {
        let now = self.clock.epoch_ms();
        self.retained.lock().retain(|_, (_, expires_at)| *expires_at > now);
    }

    pub fn clear(&self) {
        self.live.lock().clear();
        self.retained.lock().clear();
    }
}

/// Per-plan mutual exclusion, evicted once a plan's metadata is forgotten.
#[derive(Default)]
pub(crate) struct PlanLocks {
    locks: Mutex<HashMap<PlanId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PlanLocks {
    /// The lock for a plan, created on first use. Callers hold the `Arc`,
    /// so eviction never invalidates a held guard.
    pub fn lock_for(&self, plan_id: &PlanId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(plan_id.clone()).or_default().clone()
    }

    pub fn evict(&self, plan_id: &PlanId) {
        self.locks.lock().remove(plan_id);
    }

    pub fn clear(&self) {
        self.locks.lock().clear();
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
