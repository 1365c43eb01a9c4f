use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    message::{MessageBody, ServerMessage},
    traits::SessionCallback,
};

/// One frame handed to a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message {
        message_id: u64,
        consumer_id: u64,
        delivery_count: u32,
        /// Sequence of a forced-delivery marker.
        forced: Option<i64>,
    },
    LargeHeader {
        message_id: u64,
        consumer_id: u64,
        body_size: u64,
        delivery_count: u32,
    },
    Continuation {
        consumer_id: u64,
        len: usize,
        has_more: bool,
        cancelled: bool,
    },
}

impl Frame {
    /// Message id of an ordinary message or large message header.
    #[must_use]
    pub const fn message_id(&self) -> Option<u64> {
        match self {
            Self::Message { message_id, .. } | Self::LargeHeader { message_id, .. } => {
                Some(*message_id)
            }
            Self::Continuation { .. } => None,
        }
    }
}

/// A session callback that records frames instead of writing them.
///
/// Frame sizes are the body length plus a fixed per-frame overhead; large
/// message headers have their own fixed size.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    frames: Arc<Mutex<Vec<Frame>>>,
    notify: Arc<Notify>,
    overhead: usize,
    header_size: usize,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Charge `overhead` bytes on top of the body for every message and continuation.
    #[must_use]
    pub const fn with_overhead(mut self, overhead: usize) -> Self {
        self.overhead = overhead;
        self
    }

    #[must_use]
    pub const fn with_header_size(mut self, header_size: usize) -> Self {
        self.header_size = header_size;
        self
    }

    /// Every frame recorded so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Message ids of ordinary messages sent, markers excluded.
    #[must_use]
    pub fn delivered_ids(&self) -> Vec<u64> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| match frame {
                Frame::Message {
                    message_id,
                    forced: None,
                    ..
                } => Some(*message_id),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Wait until at least `expected` frames have been recorded.
    ///
    /// Returns `false` if `timeout` passes first.
    pub async fn wait_for_frames(&self, expected: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.frames.lock().len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn record(&self, frame: Frame) {
        self.frames.lock().push(frame);
        self.notify.notify_waiters();
    }
}

impl SessionCallback for RecordingTransport {
    fn send_message(&self, message: &ServerMessage, consumer_id: u64, delivery_count: u32) -> usize {
        self.record(Frame::Message {
            message_id: message.message_id(),
            consumer_id,
            delivery_count,
            forced: message.forced_delivery_sequence(),
        });

        let body = match message.body() {
            MessageBody::Standard(body) => body.len(),
            MessageBody::Large(_) => 0,
        };
        body + self.overhead
    }

    fn send_large_message(
        &self,
        message: &ServerMessage,
        consumer_id: u64,
        body_size: u64,
        delivery_count: u32,
    ) -> usize {
        self.record(Frame::LargeHeader {
            message_id: message.message_id(),
            consumer_id,
            body_size,
            delivery_count,
        });

        self.header_size
    }

    fn send_large_message_continuation(
        &self,
        consumer_id: u64,
        body: &[u8],
        has_more: bool,
        cancelled: bool,
    ) -> usize {
        self.record(Frame::Continuation {
            consumer_id,
            len: body.len(),
            has_more,
            cancelled,
        });

        body.len() + self.overhead
    }
}
