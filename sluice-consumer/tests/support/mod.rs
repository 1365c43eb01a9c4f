//! Shared wiring for consumer integration tests
#![allow(dead_code, clippy::expect_used)] // Test utility module - not all helpers used in every test

use std::{sync::Arc, time::Duration};

use sluice_consumer::{
    Binding, ConsumerConfig, ConsumerContext, ConsumerOptions, DeliveryEngine, ServerMessage,
    testing::{MemoryQueue, MemoryStorage, RecordingManagement, RecordingTransport, TestSession},
};

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// A queue and the collaborators every consumer on it shares.
pub struct Harness {
    pub queue: Arc<MemoryQueue>,
    pub transport: RecordingTransport,
    pub storage: Arc<MemoryStorage>,
    pub session: Arc<TestSession>,
    pub management: Arc<RecordingManagement>,
    pub config: ConsumerConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_queue(MemoryQueue::new("orders"))
    }

    pub fn with_queue(queue: Arc<MemoryQueue>) -> Self {
        sluice_common::logging::init();

        Self {
            queue,
            transport: RecordingTransport::new(),
            storage: Arc::new(MemoryStorage::new()),
            session: Arc::new(TestSession::new("session-1", "connection-1")),
            management: Arc::new(RecordingManagement::new()),
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: RecordingTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn context(&self) -> ConsumerContext {
        ConsumerContext {
            queue: self.queue.clone(),
            session: self.session.clone(),
            callback: Arc::new(self.transport.clone()),
            storage: self.storage.clone(),
            management: self.management.clone(),
            binding: Binding {
                address: "orders".to_string(),
                cluster_name: "orders-cluster".to_string(),
                routing_name: "orders".to_string(),
                distance: 0,
            },
        }
    }

    pub fn consumer(&self, id: u64, options: ConsumerOptions) -> Arc<DeliveryEngine> {
        DeliveryEngine::create(id, self.context(), options, self.config.clone())
            .expect("consumer should attach to the queue")
    }

    /// Wait for every dispatch pass and continuation queued so far.
    pub async fn settle(&self) {
        assert!(
            self.queue.settle(SETTLE_TIMEOUT).await,
            "queue executor did not go idle"
        );
    }
}

pub fn started() -> ConsumerOptions {
    ConsumerOptions {
        started: true,
        ..Default::default()
    }
}

/// A non-durable message with a `size` byte body.
pub fn message(id: u64, size: usize) -> ServerMessage {
    ServerMessage::new(id, "orders").with_body(vec![0u8; size])
}
