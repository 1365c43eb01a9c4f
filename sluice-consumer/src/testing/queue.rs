use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::bail;
use parking_lot::Mutex;
use tracing::error;

use crate::{
    executor::{Executor, SerialExecutor},
    message::ServerMessage,
    reference::MessageReference,
    traits::{Consumer, HandleStatus, Queue, QueueIterator},
    transaction::{Transaction, TransactionOperation},
};

#[derive(Default)]
struct QueueState {
    messages: VecDeque<MessageReference>,
    consumers: Vec<Arc<dyn Consumer>>,
    acknowledged: Vec<MessageReference>,
}

/// A FIFO queue backed by a [`SerialExecutor`].
///
/// A dispatch pass offers the head reference to each consumer in turn until
/// one takes it, and stops as soon as nobody does. Consumers are called
/// without the queue lock held, so they may acknowledge from inside
/// [`Consumer::handle`].
pub struct MemoryQueue {
    name: String,
    durable: bool,
    internal: bool,
    executor: Arc<SerialExecutor>,
    state: Mutex<QueueState>,
    closed_iterators: Arc<AtomicUsize>,
    fail_remove: AtomicBool,
    fail_cancel: AtomicBool,
    this: Weak<Self>,
}

impl MemoryQueue {
    /// A durable, non-internal queue.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_flags(name, true, false)
    }

    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn with_flags(name: impl Into<String>, durable: bool, internal: bool) -> Arc<Self> {
        let name = name.into();
        let executor = SerialExecutor::spawn(format!("queue-{name}"));

        Arc::new_cyclic(|this| Self {
            name,
            durable,
            internal,
            executor,
            state: Mutex::new(QueueState::default()),
            closed_iterators: Arc::new(AtomicUsize::new(0)),
            fail_remove: AtomicBool::new(false),
            fail_cancel: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Route a message to the tail of the queue and schedule a dispatch pass.
    pub fn send(&self, message: ServerMessage) -> MessageReference {
        let reference = MessageReference::new(Arc::new(message), self.name.as_str());
        self.state.lock().messages.push_back(reference.clone());
        self.deliver_async();
        reference
    }

    /// Wait until the executor has run everything queued on it.
    pub async fn settle(&self, timeout: Duration) -> bool {
        self.executor.wait_idle(timeout).await
    }

    #[must_use]
    pub fn serial_executor(&self) -> &Arc<SerialExecutor> {
        &self.executor
    }

    /// Message ids still waiting for a consumer, head first.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .messages
            .iter()
            .map(MessageReference::message_id)
            .collect()
    }

    #[must_use]
    pub fn pending(&self) -> Vec<MessageReference> {
        self.state.lock().messages.iter().cloned().collect()
    }

    /// Message ids acknowledged so far, in acknowledgement order.
    #[must_use]
    pub fn acknowledged_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .acknowledged
            .iter()
            .map(MessageReference::message_id)
            .collect()
    }

    /// Number of browse iterators that have been closed.
    #[must_use]
    pub fn closed_iterators(&self) -> usize {
        self.closed_iterators.load(Ordering::SeqCst)
    }

    /// Refuse the next consumer removal.
    pub fn fail_next_remove_consumer(&self) {
        self.fail_remove.store(true, Ordering::SeqCst);
    }

    /// Refuse the next cancellation staged on this queue.
    pub fn fail_next_cancel(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    fn dispatch(&self) {
        loop {
            let (reference, consumers) = {
                let state = self.state.lock();
                let Some(reference) = state.messages.front().cloned() else {
                    return;
                };
                (reference, state.consumers.clone())
            };

            let mut taken = false;
            for consumer in consumers {
                match consumer.handle(&reference) {
                    Ok(HandleStatus::Handled) => {
                        taken = true;
                        break;
                    }
                    Ok(HandleStatus::Busy | HandleStatus::NoMatch) => {}
                    Err(err) => {
                        error!(
                            "Consumer {} failed to handle message {} from {}: {err}",
                            consumer.id(),
                            reference.message_id(),
                            self.name
                        );
                    }
                }
            }

            if !taken {
                return;
            }

            let mut state = self.state.lock();
            if let Some(position) = state
                .messages
                .iter()
                .position(|queued| queued.same_as(&reference))
            {
                state.messages.remove(position);
            }
        }
    }

    fn requeue(&self, reference: MessageReference) {
        self.state.lock().messages.push_front(reference);
        self.deliver_async();
    }
}

impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_durable(&self) -> bool {
        self.durable
    }

    fn is_internal(&self) -> bool {
        self.internal
    }

    fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    fn add_consumer(&self, consumer: Arc<dyn Consumer>) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.consumers.iter().any(|c| c.id() == consumer.id()) {
            bail!("Consumer {} is already attached to {}", consumer.id(), self.name);
        }
        state.consumers.push(consumer);
        Ok(())
    }

    fn remove_consumer(&self, consumer_id: u64) -> anyhow::Result<()> {
        if self.fail_remove.swap(false, Ordering::SeqCst) {
            bail!("{} cannot detach consumer {consumer_id} right now", self.name);
        }

        let mut state = self.state.lock();
        let before = state.consumers.len();
        state.consumers.retain(|c| c.id() != consumer_id);
        if state.consumers.len() == before {
            bail!("Consumer {consumer_id} is not attached to {}", self.name);
        }
        Ok(())
    }

    fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    fn deliver_async(&self) {
        let this = self.this.clone();
        self.executor.execute(Box::new(move || {
            if let Some(queue) = this.upgrade() {
                queue.dispatch();
            }
        }));
    }

    fn iterator(&self) -> Box<dyn QueueIterator> {
        let items: Vec<_> = self.state.lock().messages.iter().cloned().collect();
        Box::new(SnapshotIterator {
            items: items.into_iter(),
            closed: self.closed_iterators.clone(),
        })
    }

    fn acknowledge(&self, reference: &MessageReference) -> anyhow::Result<()> {
        self.state.lock().acknowledged.push(reference.clone());
        Ok(())
    }

    fn acknowledge_transactional(
        &self,
        tx: &mut Transaction,
        reference: &MessageReference,
    ) -> anyhow::Result<()> {
        tx.add_operation(StagedAck {
            queue: self.this.clone(),
            reference: reference.clone(),
        });
        Ok(())
    }

    fn cancel(&self, tx: &mut Transaction, reference: &MessageReference) -> anyhow::Result<()> {
        if self.fail_cancel.swap(false, Ordering::SeqCst) {
            bail!(
                "{} cannot take message {} back right now",
                self.name,
                reference.message_id()
            );
        }

        tx.add_operation(StagedCancel {
            queue: self.this.clone(),
            reference: Some(reference.clone()),
        });
        Ok(())
    }
}

impl fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryQueue")
            .field("name", &self.name)
            .field("messages", &state.messages.len())
            .field("consumers", &state.consumers.len())
            .field("acknowledged", &state.acknowledged.len())
            .finish_non_exhaustive()
    }
}

struct SnapshotIterator {
    items: std::vec::IntoIter<MessageReference>,
    closed: Arc<AtomicUsize>,
}

impl Iterator for SnapshotIterator {
    type Item = MessageReference;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

impl QueueIterator for SnapshotIterator {
    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct StagedAck {
    queue: Weak<MemoryQueue>,
    reference: MessageReference,
}

impl TransactionOperation for StagedAck {
    fn after_commit(&mut self) -> anyhow::Result<()> {
        let Some(queue) = self.queue.upgrade() else {
            bail!("Queue dropped before commit");
        };
        queue.acknowledge(&self.reference)
    }
}

/// Returns the reference to the head of the queue however the transaction ends.
struct StagedCancel {
    queue: Weak<MemoryQueue>,
    reference: Option<MessageReference>,
}

impl StagedCancel {
    fn restore(&mut self) -> anyhow::Result<()> {
        let Some(queue) = self.queue.upgrade() else {
            bail!("Queue dropped before cancellation");
        };
        if let Some(reference) = self.reference.take() {
            queue.requeue(reference);
        }
        Ok(())
    }
}

impl TransactionOperation for StagedCancel {
    fn after_commit(&mut self) -> anyhow::Result<()> {
        self.restore()
    }

    fn after_rollback(&mut self) -> anyhow::Result<()> {
        self.restore()
    }
}
