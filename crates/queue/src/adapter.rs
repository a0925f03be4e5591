// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broker-facing contract.

use crate::driver::{ConsumerHandle, DeliveryHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from queue adapter operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("enqueue failed on '{queue}': {message}")]
    Enqueue { queue: String, message: String },
    #[error("consumer already registered on '{0}'")]
    ConsumerExists(String),
    #[error("broker shut down")]
    Shutdown,
}

/// Options for a single enqueue.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Dedup key; a message with a key equal to one still in flight
    /// (pending or being handled) is silently dropped.
    pub idempotency_key: Option<String>,
    pub headers: HashMap<String, String>,
}

impl EnqueueOptions {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self { idempotency_key: Some(key.into()), headers: HashMap::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A pluggable at-least-once message broker.
///
/// Delivery semantics: messages are redelivered after a consumer crash or a
/// `Retry` disposition; duplicates are possible and consumers must be
/// idempotent. Dedup by idempotency key applies only within the in-flight
/// window.
#[async_trait]
pub trait QueueAdapter: Send + Sync + 'static {
    /// Append a message to `queue`.
    async fn enqueue(
        &self,
        queue: &str,
        payload: Vec<u8>,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError>;

    /// Register the single consumer for `queue`. Deliveries are pushed to
    /// `handler` one at a time; the returned handle stops the consumer loop.
    async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<ConsumerHandle, QueueError>;

    /// Number of messages awaiting delivery on `queue`.
    async fn queue_depth(&self, queue: &str) -> Result<u64, QueueError>;
}
