// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Consumer-side delivery contract.
//!
//! A handler receives one [`Delivery`] at a time, runs to completion, and
//! returns a [`Disposition`]; the broker applies the disposition after the
//! handler returns. Handlers never touch broker internals directly, which
//! keeps the ack/retry/dead-letter decision in one observable place.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A single message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned message id
    pub id: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// 0-based count of deliveries before this one
    pub attempts: u32,
}

impl Delivery {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Outcome a handler reports for a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done with the message; remove it from the queue.
    Ack,
    /// Redeliver after an optional delay.
    Retry { delay_ms: Option<u64> },
    /// Remove the message and park it on the dead-letter queue.
    DeadLetter { reason: String },
}

/// Message handler registered with [`QueueAdapter::consume`](crate::QueueAdapter::consume).
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Disposition;
}

/// Handle to a running consumer loop.
///
/// Dropping the handle leaves the loop running; call [`stop`](Self::stop)
/// to cancel it and wait for the in-flight handler to finish.
pub struct ConsumerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub(crate) fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { cancel, task }
    }

    /// Stop the consumer loop. In-flight handlers run to completion.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                tracing::warn!(error = %err, "consumer task ended abnormally");
            }
        }
    }
}
