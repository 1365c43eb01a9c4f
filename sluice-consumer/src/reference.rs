//! Per-queue delivery obligations.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use crate::message::ServerMessage;

#[derive(Debug)]
struct ReferenceInner {
    message: Arc<ServerMessage>,
    queue: Arc<str>,
    delivery_count: AtomicU32,
    handled: AtomicBool,
}

/// One (message, queue) delivery obligation.
///
/// Cloning yields another handle to the same reference; the queue and the
/// delivering consumer observe the same delivery count and handled flag.
#[derive(Clone)]
pub struct MessageReference {
    inner: Arc<ReferenceInner>,
}

impl MessageReference {
    #[must_use]
    pub fn new(message: Arc<ServerMessage>, queue: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(ReferenceInner {
                message,
                queue: queue.into(),
                delivery_count: AtomicU32::new(0),
                handled: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn message(&self) -> &Arc<ServerMessage> {
        &self.inner.message
    }

    #[must_use]
    pub fn message_id(&self) -> u64 {
        self.inner.message.message_id()
    }

    /// Name of the queue owning this reference.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.inner.queue
    }

    #[must_use]
    pub fn delivery_count(&self) -> u32 {
        self.inner.delivery_count.load(Ordering::Acquire)
    }

    /// Restore a persisted delivery count (journal reload).
    pub fn set_delivery_count(&self, count: u32) {
        self.inner.delivery_count.store(count, Ordering::Release);
    }

    pub fn increment_delivery_count(&self) {
        self.inner.delivery_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at zero.
    pub fn decrement_delivery_count(&self) {
        let _ = self
            .inner
            .delivery_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
    }

    /// Mark the reference as picked up by a consumer.
    pub fn handled(&self) {
        self.inner.handled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.inner.handled.load(Ordering::Acquire)
    }

    /// Whether both handles point at the same reference.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MessageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageReference")
            .field("message_id", &self.message_id())
            .field("queue", &self.queue_name())
            .field("delivery_count", &self.delivery_count())
            .field("handled", &self.is_handled())
            .finish()
    }
}
