// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime counters.
//!
//! Lock-free atomics updated on the consumer hot path; `snapshot` produces
//! a serializable view for status surfaces and tests.

use pq_core::StepState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live runtime metrics.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    step_queue_depth: AtomicU64,
}

/// Point-in-time copy of [`RuntimeMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub step_queue_depth: u64,
}

impl RuntimeMetrics {
    /// Count one terminal outcome.
    pub fn record_terminal(&self, state: StepState) {
        let counter = match state {
            StepState::Completed => &self.completed,
            StepState::Failed => &self.failed,
            StepState::Rejected => &self.rejected,
            StepState::DeadLettered => &self.dead_lettered,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one retry requeue.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh the step-queue depth gauge.
    pub fn set_step_queue_depth(&self, depth: u64) {
        self.step_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            step_queue_depth: self.step_queue_depth.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
