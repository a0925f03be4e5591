// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process event bus with bounded history.
//!
//! Publishes fan out over a per-plan broadcast channel: a publisher never
//! waits on a subscriber; a subscriber that lags past the channel capacity
//! loses the overrun and keeps receiving from there. Retained history
//! replays to late subscribers and is pruned to the retention window on
//! every publish and read.

use parking_lot::Mutex;
use pq_core::{Clock, PlanId, PlanStepEvent, StepId};
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;

/// Broadcast capacity per plan; beyond this a slow subscriber lags.
const FANOUT_CAPACITY: usize = 256;

#[derive(Default)]
struct BusInner {
    /// (plan, step) → retained events, oldest first
    history: HashMap<PlanId, HashMap<StepId, VecDeque<PlanStepEvent>>>,
    senders: HashMap<PlanId, broadcast::Sender<PlanStepEvent>>,
}

/// Publish/subscribe hub for [`PlanStepEvent`] records.
pub struct EventBus<C: Clock> {
    clock: C,
    retention_ms: u64,
    inner: Mutex<BusInner>,
}

impl<C: Clock> EventBus<C> {
    pub fn new(clock: C, retention_ms: u64) -> Self {
        Self { clock, retention_ms, inner: Mutex::new(BusInner::default()) }
    }

    /// Publish one event. Returns false when the event was dropped as a
    /// duplicate of the latest retained observation for its step.
    pub fn publish(&self, event: PlanStepEvent) -> bool {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        Self::prune_locked(&mut inner, now, self.retention_ms);

        let per_step = inner
            .history
            .entry(event.plan_id.clone())
            .or_default()
            .entry(event.step_id.clone())
            .or_default();
        if per_step.back().is_some_and(|latest| latest.same_observation(&event)) {
            tracing::debug!(
                plan_id = %event.plan_id,
                step_id = %event.step_id,
                state = %event.state,
                "dropping duplicate event"
            );
            return false;
        }
        per_step.push_back(event.clone());

        if let Some(tx) = inner.senders.get(&event.plan_id) {
            // Err means no live receivers; history still serves replays.
            let _ = tx.send(event);
        }
        true
    }

    /// Subscribe to a plan: retained history first (oldest first), then
    /// live events.
    pub fn subscribe(&self, plan_id: &PlanId) -> EventStream {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        Self::prune_locked(&mut inner, now, self.retention_ms);

        let rx = inner
            .senders
            .entry(plan_id.clone())
            .or_insert_with(|| broadcast::channel(FANOUT_CAPACITY).0)
            .subscribe();

        let mut replay: Vec<PlanStepEvent> = inner
            .history
            .get(plan_id)
            .map(|steps| steps.values().flatten().cloned().collect())
            .unwrap_or_default();
        replay.sort_by_key(|e| e.occurred_at_ms);

        EventStream { replay: replay.into(), rx }
    }

    /// Most recent retained event for a step.
    pub fn latest(&self, plan_id: &PlanId, step_id: &StepId) -> Option<PlanStepEvent> {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        Self::prune_locked(&mut inner, now, self.retention_ms);
        inner.history.get(plan_id).and_then(|steps| steps.get(step_id)).and_then(|h| h.back()).cloned()
    }

    /// Drop retained events older than the window and channels nobody
    /// listens to. Called by the runtime's sweeper and on every access.
    pub fn prune(&self) {
        let now = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        Self::prune_locked(&mut inner, now, self.retention_ms);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.history.clear();
        inner.senders.clear();
    }

    fn prune_locked(inner: &mut BusInner, now: u64, retention_ms: u64) {
        let cutoff = now.saturating_sub(retention_ms);
        inner.history.retain(|_, steps| {
            steps.retain(|_, history| {
                while history.front().is_some_and(|e| e.occurred_at_ms < cutoff) {
                    history.pop_front();
                }
                !history.is_empty()
            });
            !steps.is_empty()
        });
        inner.senders.retain(|_, tx| tx.receiver_count() > 0);
    }
}

/// Replay-then-live event stream for one plan.
pub struct EventStream {
    replay: VecDeque<PlanStepEvent>,
    rx: broadcast::Receiver<PlanStepEvent>,
}

impl EventStream {
    /// Next event, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<PlanStepEvent> {
        if let Some(event) = self.replay.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
