// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Memory broker tests

use super::*;
use std::time::Duration;

/// Records deliveries and replies with a scripted disposition per call.
struct Script {
    deliveries: Mutex<Vec<Delivery>>,
    dispositions: Mutex<VecDeque<Disposition>>,
}

impl Script {
    fn new(dispositions: Vec<Disposition>) -> Arc<Self> {
        Arc::new(Self {
            deliveries: Mutex::new(Vec::new()),
            dispositions: Mutex::new(dispositions.into()),
        })
    }

    fn delivered(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    async fn wait_for(&self, count: usize) {
        for _ in 0..200 {
            if self.deliveries.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} deliveries");
    }
}

#[async_trait]
impl DeliveryHandler for Script {
    async fn handle(&self, delivery: Delivery) -> Disposition {
        self.deliveries.lock().push(delivery);
        self.dispositions.lock().pop_front().unwrap_or(Disposition::Ack)
    }
}

#[tokio::test]
async fn delivers_in_order_and_acks() {
    let broker = MemoryBroker::new();
    broker.enqueue("q", b"one".to_vec(), EnqueueOptions::default()).await.unwrap();
    broker.enqueue("q", b"two".to_vec(), EnqueueOptions::default()).await.unwrap();

    let script = Script::new(vec![]);
    let handle = broker.consume("q", script.clone()).await.unwrap();
    script.wait_for(2).await;

    let delivered = script.delivered();
    assert_eq!(delivered[0].payload, b"one");
    assert_eq!(delivered[1].payload, b"two");
    assert_eq!(delivered[0].attempts, 0);
    assert_eq!(broker.queue_depth("q").await.unwrap(), 0);
    handle.stop().await;
}

#[tokio::test]
async fn headers_ride_along() {
    let broker = MemoryBroker::new();
    broker
        .enqueue("q", b"x".to_vec(), EnqueueOptions::with_key("k").header("trace-id", "t-9"))
        .await
        .unwrap();
    let script = Script::new(vec![]);
    let handle = broker.consume("q", script.clone()).await.unwrap();
    script.wait_for(1).await;
    assert_eq!(script.delivered()[0].header("trace-id"), Some("t-9"));
    handle.stop().await;
}

#[tokio::test]
async fn dedups_by_idempotency_key_within_flight_window() {
    let broker = MemoryBroker::new();
    broker.enqueue("q", b"a".to_vec(), EnqueueOptions::with_key("k1")).await.unwrap();
    broker.enqueue("q", b"dup".to_vec(), EnqueueOptions::with_key("k1")).await.unwrap();
    assert_eq!(broker.queue_depth("q").await.unwrap(), 1);

    let script = Script::new(vec![]);
    let handle = broker.consume("q", script.clone()).await.unwrap();
    script.wait_for(1).await;

    // Once acked, the key is released and may be reused.
    broker.enqueue("q", b"b".to_vec(), EnqueueOptions::with_key("k1")).await.unwrap();
    script.wait_for(2).await;
    assert_eq!(script.delivered()[1].payload, b"b");
    handle.stop().await;
}

#[tokio::test]
async fn retry_redelivers_with_incremented_attempts() {
    let broker = MemoryBroker::new();
    broker.enqueue("q", b"flaky".to_vec(), EnqueueOptions::default()).await.unwrap();

    let script = Script::new(vec![
        Disposition::Retry { delay_ms: None },
        Disposition::Retry { delay_ms: Some(0) },
    ]);
    let handle = broker.consume("q", script.clone()).await.unwrap();
    script.wait_for(3).await;

    let attempts: Vec<u32> = script.delivered().iter().map(|d| d.attempts).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    handle.stop().await;
}

#[tokio::test]
async fn dead_letter_parks_message_with_reason() {
    let broker = MemoryBroker::new();
    broker.enqueue("q", b"bad".to_vec(), EnqueueOptions::with_key("k")).await.unwrap();

    let script = Script::new(vec![Disposition::DeadLetter { reason: "no luck".to_string() }]);
    let handle = broker.consume("q", script.clone()).await.unwrap();
    script.wait_for(1).await;
    handle.stop().await;

    let dead = broker.dead_letters("q");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, "no luck");
    assert_eq!(dead[0].payload, b"bad");
    assert_eq!(broker.queue_depth("q").await.unwrap(), 0);

    // Key released: a fresh enqueue is accepted.
    broker.enqueue("q", b"again".to_vec(), EnqueueOptions::with_key("k")).await.unwrap();
    assert_eq!(broker.queue_depth("q").await.unwrap(), 1);
}

#[tokio::test]
async fn second_consumer_is_rejected() {
    let broker = MemoryBroker::new();
    let handle = broker.consume("q", Script::new(vec![])).await.unwrap();
    let err = broker.consume("q", Script::new(vec![])).await.unwrap_err();
    assert!(matches!(err, QueueError::ConsumerExists(q) if q == "q"));
    handle.stop().await;

    // After stop, the slot is free again.
    let handle = broker.consume("q", Script::new(vec![])).await.unwrap();
    handle.stop().await;
}

#[tokio::test]
async fn injected_enqueue_failure_fires_once() {
    let broker = MemoryBroker::new();
    broker.inject_enqueue_failure("q", "broker on fire");
    let err = broker.enqueue("q", b"x".to_vec(), EnqueueOptions::default()).await.unwrap_err();
    assert!(matches!(err, QueueError::Enqueue { .. }));
    broker.enqueue("q", b"x".to_vec(), EnqueueOptions::default()).await.unwrap();
}

#[tokio::test]
async fn redeliver_copy_duplicates_a_live_message() {
    let broker = MemoryBroker::new();
    broker.enqueue("q", b"orig".to_vec(), EnqueueOptions::with_key("k")).await.unwrap();
    assert!(broker.redeliver_copy("q", "k"));
    assert!(!broker.redeliver_copy("q", "missing"));

    let script = Script::new(vec![]);
    let handle = broker.consume("q", script.clone()).await.unwrap();
    script.wait_for(2).await;
    assert_eq!(script.delivered()[0].payload, script.delivered()[1].payload);
    handle.stop().await;
}
