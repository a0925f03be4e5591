// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process reference broker.
//!
//! Single consumer per queue, deliveries handed to the handler one at a
//! time. At-least-once: a `Retry` disposition re-queues the message (after
//! an optional delay) with an incremented attempt count; idempotency keys
//! dedup enqueues while the original message is still live.

use crate::adapter::{EnqueueOptions, QueueAdapter, QueueError};
use crate::driver::{ConsumerHandle, Delivery, DeliveryHandler, Disposition};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Message {
    id: String,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
    key: Option<String>,
    attempts: u32,
}

/// A message parked on the dead-letter queue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub reason: String,
    pub attempts: u32,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Message>,
    /// Message currently in the consumer's hands
    inflight: Option<Message>,
    /// Messages sleeping out a retry delay
    parked: usize,
    /// Idempotency keys of live messages (pending, parked, or in flight)
    live_keys: HashSet<String>,
    dead: Vec<DeadLetter>,
    consumer_registered: bool,
    next_seq: u64,
    #[cfg(any(test, feature = "test-support"))]
    enqueue_fault: Option<String>,
}

impl QueueState {
    /// Messages awaiting delivery (pending plus parked); the message in the
    /// consumer's hands is not counted.
    fn depth(&self) -> u64 {
        self.pending.len() as u64 + self.parked as u64
    }
}

struct QueueSlot {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// In-memory [`QueueAdapter`] used by tests and single-node deployments.
#[derive(Clone)]
pub struct MemoryBroker {
    queues: Arc<Mutex<HashMap<String, Arc<QueueSlot>>>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self { queues: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn slot(&self, queue: &str) -> Arc<QueueSlot> {
        let mut queues = self.queues.lock();
        queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                Arc::new(QueueSlot { state: Mutex::new(QueueState::default()), notify: Notify::new() })
            })
            .clone()
    }

    /// Dead-lettered messages for `queue`, oldest first.
    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.slot(queue).state.lock().dead.clone()
    }

    /// Make the next `enqueue` on `queue` fail with the given message.
    #[cfg(any(test, feature = "test-support"))]
    pub fn inject_enqueue_failure(&self, queue: &str, message: impl Into<String>) {
        self.slot(queue).state.lock().enqueue_fault = Some(message.into());
    }

    /// Push a duplicate of the live message with `key` back onto the queue,
    /// simulating broker redelivery. Returns false when no such message is
    /// live.
    #[cfg(any(test, feature = "test-support"))]
    pub fn redeliver_copy(&self, queue: &str, key: &str) -> bool {
        let slot = self.slot(queue);
        let mut state = slot.state.lock();
        let found = state
            .pending
            .iter()
            .chain(state.inflight.as_ref())
            .find(|m| m.key.as_deref() == Some(key))
            .cloned();
        match found {
            Some(copy) => {
                state.pending.push_back(copy);
                drop(state);
                slot.notify.notify_one();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl QueueAdapter for MemoryBroker {
    async fn enqueue(
        &self,
        queue: &str,
        payload: Vec<u8>,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        let slot = self.slot(queue);
        {
            let mut state = slot.state.lock();

            #[cfg(any(test, feature = "test-support"))]
            if let Some(message) = state.enqueue_fault.take() {
                return Err(QueueError::Enqueue { queue: queue.to_string(), message });
            }

            if let Some(key) = &opts.idempotency_key {
                if state.live_keys.contains(key) {
                    tracing::debug!(queue, key, "dropping duplicate enqueue");
                    return Ok(());
                }
                state.live_keys.insert(key.clone());
            }

            state.next_seq += 1;
            let message = Message {
                id: format!("m-{}", state.next_seq),
                payload,
                headers: opts.headers,
                key: opts.idempotency_key,
                attempts: 0,
            };
            state.pending.push_back(message);
        }
        slot.notify.notify_one();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, QueueError> {
        let slot = self.slot(queue);
        {
            let mut state = slot.state.lock();
            if state.consumer_registered {
                return Err(QueueError::ConsumerExists(queue.to_string()));
            }
            state.consumer_registered = true;
        }

        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let loop_slot = slot.clone();
        let queue_name = queue.to_string();
        let task = tokio::spawn(async move {
            consumer_loop(loop_slot.clone(), handler, loop_cancel, queue_name).await;
            loop_slot.state.lock().consumer_registered = false;
        });

        Ok(ConsumerHandle::new(cancel, task))
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.slot(queue).state.lock().depth())
    }
}

async fn consumer_loop(
    slot: Arc<QueueSlot>,
    handler: Arc<dyn DeliveryHandler>,
    cancel: CancellationToken,
    queue: String,
) {
    loop {
        let message = {
            let mut state = slot.state.lock();
            match state.pending.pop_front() {
                Some(m) => {
                    state.inflight = Some(m.clone());
                    Some(m)
                }
                None => None,
            }
        };

        let Some(message) = message else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = slot.notify.notified() => continue,
            }
        };

        let delivery = Delivery {
            id: message.id.clone(),
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            attempts: message.attempts,
        };
        let disposition = handler.handle(delivery).await;
        apply_disposition(&slot, &queue, message, disposition);

        if cancel.is_cancelled() {
            break;
        }
    }
}

fn apply_disposition(slot: &Arc<QueueSlot>, queue: &str, message: Message, disposition: Disposition) {
    let mut state = slot.state.lock();
    state.inflight = None;
    match disposition {
        Disposition::Ack => {
            if let Some(key) = &message.key {
                state.live_keys.remove(key);
            }
        }
        Disposition::Retry { delay_ms } => {
            let mut message = message;
            message.attempts += 1;
            match delay_ms.filter(|d| *d > 0) {
                Some(delay) => {
                    state.parked += 1;
                    drop(state);
                    let slot = slot.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        {
                            let mut state = slot.state.lock();
                            state.parked -= 1;
                            state.pending.push_back(message);
                        }
                        slot.notify.notify_one();
                    });
                    return;
                }
                None => {
                    state.pending.push_back(message);
                    drop(state);
                    slot.notify.notify_one();
                    return;
                }
            }
        }
        Disposition::DeadLetter { reason } => {
            tracing::warn!(queue, id = %message.id, attempts = message.attempts, reason, "dead-lettering message");
            if let Some(key) = &message.key {
                state.live_keys.remove(key);
            }
            state.dead.push(DeadLetter {
                payload: message.payload,
                headers: message.headers,
                reason,
                attempts: message.attempts,
            });
        }
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
