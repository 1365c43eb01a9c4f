//! Acknowledgement, cancellation and delivery counts
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sluice_consumer::{
    ConsumerError, ConsumerOptions, DeliveryEngine, MessageReference, Transaction,
    testing::MemoryQueue, traits::Queue,
};
use support::{Harness, message, started};

fn ids(references: &[MessageReference]) -> Vec<u64> {
    references.iter().map(MessageReference::message_id).collect()
}

/// A started, unbounded consumer holding messages `1..=count` in flight.
async fn delivered(harness: &Harness, count: u64) -> Arc<DeliveryEngine> {
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(-1).unwrap();
    for id in 1..=count {
        harness.queue.send(message(id, 10));
    }
    harness.settle().await;
    assert_eq!(consumer.in_flight_count(), usize::try_from(count).unwrap());
    consumer
}

#[tokio::test]
async fn test_cumulative_acknowledge() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 5).await;

    consumer.acknowledge(true, None, 3).unwrap();

    assert_eq!(harness.queue.acknowledged_ids(), vec![1, 2, 3]);
    assert_eq!(ids(&consumer.in_flight()), vec![4, 5]);
}

#[tokio::test]
async fn test_cumulative_acknowledge_of_unknown_message_fails_loudly() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 2).await;

    let err = consumer.acknowledge(true, None, 99).unwrap_err();

    assert!(err.is_protocol_violation());
    assert!(matches!(
        err,
        ConsumerError::ReferenceNotFound {
            consumer_id: 1,
            message_id: 99,
            closed: false,
            ..
        }
    ));
    assert!(err.to_string().contains("orders"));

    // Everything popped on the way stays acknowledged
    assert_eq!(harness.queue.acknowledged_ids(), vec![1, 2]);
    assert_eq!(consumer.in_flight_count(), 0);
}

#[tokio::test]
async fn test_individual_acknowledge() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 3).await;

    consumer.individual_acknowledge(true, None, 2).unwrap();
    assert_eq!(harness.queue.acknowledged_ids(), vec![2]);
    assert_eq!(ids(&consumer.in_flight()), vec![1, 3]);

    let err = consumer.individual_acknowledge(true, None, 2).unwrap_err();
    assert!(matches!(err, ConsumerError::ReferenceNotFound { message_id: 2, .. }));
}

#[tokio::test]
async fn test_transactional_acknowledge_waits_for_commit() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 3).await;

    let mut tx = Transaction::new(7);
    consumer.acknowledge(false, Some(&mut tx), 2).unwrap();
    assert!(harness.queue.acknowledged_ids().is_empty());
    assert_eq!(ids(&consumer.in_flight()), vec![3]);

    tx.commit().unwrap();
    assert_eq!(harness.queue.acknowledged_ids(), vec![1, 2]);
}

#[tokio::test]
async fn test_auto_commit_ignores_transaction() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 1).await;

    let mut tx = Transaction::new(7);
    consumer.individual_acknowledge(true, Some(&mut tx), 1).unwrap();

    assert_eq!(harness.queue.acknowledged_ids(), vec![1]);
    assert_eq!(tx.operation_count(), 0);
}

#[tokio::test]
async fn test_cancel_refs_treats_oldest_as_delivered() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 5).await;

    let cancelled = consumer.cancel_refs(false, true, None).unwrap();

    assert_eq!(harness.queue.acknowledged_ids(), vec![1]);
    assert_eq!(ids(&cancelled), vec![2, 3, 4, 5]);
    assert!(cancelled.iter().all(|r| r.delivery_count() == 0));
    assert_eq!(consumer.in_flight_count(), 0);
}

#[tokio::test]
async fn test_cancel_refs_after_failure_keeps_delivery_counts() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 3).await;

    let cancelled = consumer.cancel_refs(true, false, None).unwrap();

    assert_eq!(ids(&cancelled), vec![1, 2, 3]);
    assert!(cancelled.iter().all(|r| r.delivery_count() == 1));
    assert!(harness.queue.acknowledged_ids().is_empty());
}

#[tokio::test]
async fn test_remove_reference_by_id() {
    let harness = Harness::new();
    let consumer = delivered(&harness, 3).await;

    let removed = consumer.remove_reference_by_id(2).unwrap();
    assert_eq!(removed.message_id(), 2);
    assert!(consumer.remove_reference_by_id(2).is_none());
    assert_eq!(ids(&consumer.in_flight()), vec![1, 3]);
    assert!(harness.queue.acknowledged_ids().is_empty());
}

#[tokio::test]
async fn test_pre_acknowledge_skips_ledger() {
    let harness = Harness::new();
    let consumer = harness.consumer(
        1,
        ConsumerOptions {
            pre_acknowledge: true,
            ..started()
        },
    );
    consumer.receive_credits(-1).unwrap();

    harness.queue.send(message(1, 10));
    harness.queue.send(message(2, 10));
    harness.settle().await;

    assert_eq!(harness.transport.delivered_ids(), vec![1, 2]);
    assert_eq!(harness.queue.acknowledged_ids(), vec![1, 2]);
    assert_eq!(consumer.in_flight_count(), 0);
}

#[tokio::test]
async fn test_strict_delivery_count_is_persisted_for_durable_messages() {
    let harness = Harness::new();
    let consumer = harness.consumer(
        1,
        ConsumerOptions {
            strict_update_delivery_count: true,
            ..started()
        },
    );
    consumer.receive_credits(-1).unwrap();

    harness.queue.send(message(1, 10).durable(true));
    harness.queue.send(message(2, 10));
    harness.settle().await;

    assert_eq!(harness.transport.delivered_ids(), vec![1, 2]);
    assert_eq!(harness.storage.delivery_count_updates(), vec![(1, 1)]);
}

#[tokio::test]
async fn test_internal_queue_never_persists_delivery_count() {
    let harness = Harness::with_queue(MemoryQueue::with_flags("orders", true, true));
    let consumer = harness.consumer(
        1,
        ConsumerOptions {
            strict_update_delivery_count: true,
            ..started()
        },
    );
    consumer.receive_credits(-1).unwrap();

    harness.queue.send(message(1, 10).durable(true));
    harness.settle().await;

    assert_eq!(harness.transport.delivered_ids(), vec![1]);
    assert!(harness.storage.delivery_count_updates().is_empty());
}

#[tokio::test]
async fn test_failed_journal_update_leaves_reference_with_queue() {
    let harness = Harness::new();
    let consumer = harness.consumer(
        1,
        ConsumerOptions {
            strict_update_delivery_count: true,
            ..started()
        },
    );
    consumer.receive_credits(-1).unwrap();
    harness.storage.fail_updates(true);

    let reference = harness.queue.send(message(1, 10).durable(true));
    harness.settle().await;

    assert!(harness.transport.frames().is_empty());
    assert_eq!(harness.queue.pending_ids(), vec![1]);
    assert_eq!(consumer.in_flight_count(), 0);
    assert_eq!(reference.delivery_count(), 0);

    harness.storage.fail_updates(false);
    harness.queue.deliver_async();
    harness.settle().await;
    assert_eq!(harness.transport.delivered_ids(), vec![1]);
    assert_eq!(reference.delivery_count(), 1);
}
