//! Read-only delivery for browse-only consumers.

use parking_lot::Mutex;
use tracing::error;

use crate::{
    reference::MessageReference,
    traits::{Consumer, HandleStatus, QueueIterator},
};

struct CursorState {
    iterator: Box<dyn QueueIterator>,
    /// Reference that was busy or failed on the previous pass, offered first
    /// next time.
    current: Option<MessageReference>,
    closed: bool,
}

/// Walks a queue's references without consuming them.
///
/// A pass stops at the first busy answer and resumes from that reference on
/// the next pass instead of restarting the iteration.
pub struct BrowseCursor {
    state: Mutex<CursorState>,
}

impl BrowseCursor {
    #[must_use]
    pub fn new(iterator: Box<dyn QueueIterator>) -> Self {
        Self {
            state: Mutex::new(CursorState {
                iterator,
                current: None,
                closed: false,
            }),
        }
    }

    /// Offer references to `consumer` until it is busy or the queue is exhausted.
    pub fn run(&self, consumer: &dyn Consumer) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        if let Some(current) = state.current.take() {
            match consumer.handle(&current) {
                Ok(HandleStatus::Busy) => {
                    state.current = Some(current);
                    return;
                }
                Ok(HandleStatus::Handled | HandleStatus::NoMatch) => {}
                Err(err) => {
                    error!(
                        consumer_id = consumer.id(),
                        message_id = current.message_id(),
                        "Browser failed to deliver from {}: {err}",
                        current.queue_name()
                    );
                    state.current = Some(current);
                    return;
                }
            }
        }

        while let Some(reference) = state.iterator.next() {
            match consumer.handle(&reference) {
                Ok(HandleStatus::Busy) => {
                    state.current = Some(reference);
                    break;
                }
                Ok(HandleStatus::Handled | HandleStatus::NoMatch) => {}
                Err(err) => {
                    error!(
                        consumer_id = consumer.id(),
                        message_id = reference.message_id(),
                        "Browser failed to deliver from {}: {err}",
                        reference.queue_name()
                    );
                    state.current = Some(reference);
                    break;
                }
            }
        }
    }

    /// Release the underlying iterator. Later passes do nothing.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        state.closed = true;
        state.current = None;
        state.iterator.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl std::fmt::Debug for BrowseCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BrowseCursor")
            .field("current", &state.current)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}
