// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pq-queue: At-least-once message broker abstraction.
//!
//! The runtime talks to brokers exclusively through [`QueueAdapter`]. The
//! in-process [`MemoryBroker`] is the reference implementation; production
//! deployments plug an external broker in behind the same trait.

mod adapter;
mod driver;
mod memory;

pub use adapter::{EnqueueOptions, QueueAdapter, QueueError};
pub use driver::{ConsumerHandle, Delivery, DeliveryHandler, Disposition};
pub use memory::{DeadLetter, MemoryBroker};
