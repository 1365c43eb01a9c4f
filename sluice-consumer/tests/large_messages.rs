//! Chunked delivery of large message bodies
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use sluice_consumer::{
    ConsumerConfig, ConsumerOptions, LargeBody, ServerMessage,
    testing::{Frame, MemoryLargeBody},
};
use support::{Harness, message, started};

fn chunked_config() -> ConsumerConfig {
    ConsumerConfig {
        min_large_message_size: 1024,
        ..Default::default()
    }
}

fn large_message(id: u64, body: &Arc<MemoryLargeBody>) -> ServerMessage {
    let body: Arc<dyn LargeBody> = body.clone();
    ServerMessage::new(id, "orders").with_large_body(body)
}

fn continuations(frames: &[Frame]) -> Vec<(usize, bool)> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            Frame::Continuation { len, has_more, .. } => Some((*len, *has_more)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_streams_body_in_chunks() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(-1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(vec![3u8; 10 * 1024]));
    harness.queue.send(large_message(1, &body));
    harness.queue.send(message(2, 10));
    harness.settle().await;

    let frames = harness.transport.frames();
    assert_eq!(
        frames[0],
        Frame::LargeHeader {
            message_id: 1,
            consumer_id: 1,
            body_size: 10 * 1024,
            delivery_count: 1,
        }
    );

    let chunks = continuations(&frames);
    assert_eq!(chunks.len(), 10);
    assert!(chunks.iter().all(|(len, _)| *len == 1024));
    assert!(chunks[..9].iter().all(|(_, more)| *more));
    assert!(!chunks[9].1);

    // The next reference is only offered once the body is fully sent
    assert_eq!(frames.len(), 12);
    assert_eq!(frames[11].message_id(), Some(2));

    assert!(!consumer.is_transfer_active());
    assert_eq!(consumer.in_flight_count(), 2);
    assert_eq!(body.delay_deletion_count(), 0);
    assert!(body.is_released());
    assert!(body.encoder_closed());
}

#[tokio::test]
async fn test_transfer_resumes_when_credit_arrives() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(vec![1u8; 3000]));
    harness.queue.send(large_message(1, &body));
    harness.queue.send(message(2, 10));
    harness.settle().await;

    // Header and one chunk, then the overdrawn budget parks the transfer
    assert_eq!(harness.transport.frames().len(), 2);
    assert!(consumer.is_transfer_active());
    assert_eq!(consumer.available_credits(), Some(1 - 1024));
    assert_eq!(body.delay_deletion_count(), 1);
    assert_eq!(harness.queue.pending_ids(), vec![2]);

    consumer.receive_credits(5000).unwrap();
    harness.settle().await;

    let frames = harness.transport.frames();
    assert_eq!(continuations(&frames), vec![(1024, true), (1024, true), (952, false)]);
    assert_eq!(frames.last().and_then(Frame::message_id), Some(2));
    assert!(!consumer.is_transfer_active());
    assert_eq!(body.delay_deletion_count(), 0);
}

#[tokio::test]
async fn test_empty_body_sends_header_and_final_chunk() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(-1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(Vec::new()));
    harness.queue.send(large_message(1, &body));
    harness.settle().await;

    assert_eq!(continuations(&harness.transport.frames()), vec![(0, false)]);
    assert!(body.is_released());
}

#[tokio::test]
async fn test_close_abandons_transfer() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(vec![1u8; 4096]));
    let reference = harness.queue.send(large_message(1, &body));
    harness.settle().await;
    assert!(consumer.is_transfer_active());

    consumer.close(false).unwrap();
    harness.settle().await;

    assert!(!consumer.is_transfer_active());
    assert_eq!(body.delay_deletion_count(), 0);
    assert_eq!(body.release_count(), 1);
    assert_eq!(harness.queue.pending_ids(), vec![1]);
    assert_eq!(reference.delivery_count(), 0);
}

#[tokio::test]
async fn test_truncated_body_cancels_transfer() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(-1).unwrap();

    let body = Arc::new(MemoryLargeBody::truncated(vec![1u8; 1500], 4096));
    harness.queue.send(large_message(1, &body));
    harness.queue.send(message(2, 10));
    harness.settle().await;

    let frames = harness.transport.frames();
    assert_eq!(
        continuations(&frames),
        vec![(1024, true), (476, true), (0, false)],
        "frames: {frames:?}"
    );
    assert!(frames.contains(&Frame::Continuation {
        consumer_id: 1,
        len: 0,
        has_more: false,
        cancelled: true,
    }));

    // The consumer moves on; the broken message stays in flight until cancelled
    assert_eq!(frames.last().and_then(Frame::message_id), Some(2));
    assert_eq!(consumer.in_flight_count(), 2);
    assert_eq!(body.delay_deletion_count(), 0);
}

#[tokio::test]
async fn test_pre_acknowledge_holds_body_until_sent() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(
        1,
        ConsumerOptions {
            pre_acknowledge: true,
            ..started()
        },
    );
    consumer.receive_credits(1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(vec![1u8; 4096]));
    harness.queue.send(large_message(1, &body));
    harness.settle().await;

    // Acknowledged on the queue, yet still readable for the rest of the body
    assert_eq!(harness.queue.acknowledged_ids(), vec![1]);
    assert_eq!(consumer.in_flight_count(), 0);
    assert_eq!(body.delay_deletion_count(), 2);

    consumer.receive_credits(-1).unwrap();
    harness.settle().await;

    assert!(!consumer.is_transfer_active());
    assert_eq!(body.delay_deletion_count(), 0);
}

#[tokio::test]
async fn test_transfer_mode_waits_for_active_transfer() {
    let harness = Harness::new().with_config(chunked_config());
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(vec![1u8; 4096]));
    harness.queue.send(large_message(1, &body));
    harness.settle().await;
    assert!(consumer.is_transfer_active());

    let grant = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(consumer.is_transfer_active());
        consumer.receive_credits(-1).unwrap();
    };
    tokio::join!(consumer.set_transferring(true), grant);

    assert!(!consumer.is_transfer_active());
    assert_eq!(continuations(&harness.transport.frames()).len(), 4);

    // Nothing new is admitted while transferring
    harness.queue.send(message(2, 10));
    harness.settle().await;
    assert_eq!(harness.queue.pending_ids(), vec![2]);

    consumer.set_transferring(false).await;
    harness.settle().await;
    assert!(harness.queue.pending_ids().is_empty());
}

#[tokio::test]
async fn test_transfer_mode_wait_is_bounded() {
    let harness = Harness::new().with_config(ConsumerConfig {
        flush_timeout_ms: 100,
        ..chunked_config()
    });
    let consumer = harness.consumer(1, started());
    consumer.receive_credits(1).unwrap();

    let body = Arc::new(MemoryLargeBody::new(vec![1u8; 4096]));
    harness.queue.send(large_message(1, &body));
    harness.settle().await;

    tokio::time::timeout(Duration::from_secs(5), consumer.set_transferring(true))
        .await
        .expect("set_transferring should give up after the flush timeout");

    assert!(consumer.is_transfer_active());
}
