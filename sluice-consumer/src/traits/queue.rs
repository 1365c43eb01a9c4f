use std::{fmt, sync::Arc};

use crate::{
    error::ConsumerError, executor::Executor, reference::MessageReference,
    transaction::Transaction,
};

/// Answer to a reference offered by a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleStatus {
    /// The consumer took the reference.
    Handled,
    /// The consumer cannot take anything right now; offer it again once
    /// delivery is re-attempted.
    Busy,
    /// The consumer's filter does not select this message.
    NoMatch,
}

/// Something a queue can offer references to.
pub trait Consumer: Send + Sync {
    fn id(&self) -> u64;

    /// Offer a reference.
    ///
    /// # Errors
    /// If accepting the reference failed part-way, e.g. a journal write
    fn handle(&self, reference: &MessageReference) -> Result<HandleStatus, ConsumerError>;
}

/// Iterator over a queue's current references, used by browsers.
pub trait QueueIterator: Iterator<Item = MessageReference> + Send {
    /// Release any resources pinned by the iterator.
    fn close(&mut self) {}
}

/// The queue a consumer is bound to.
pub trait Queue: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn is_durable(&self) -> bool;

    /// Internal queues (management, cluster plumbing) never persist delivery counts.
    fn is_internal(&self) -> bool;

    /// The serial executor that runs this queue's delivery work.
    fn executor(&self) -> Arc<dyn Executor>;

    /// # Errors
    /// If the queue refuses the consumer
    fn add_consumer(&self, consumer: Arc<dyn Consumer>) -> anyhow::Result<()>;

    /// # Errors
    /// If the consumer cannot be detached
    fn remove_consumer(&self, consumer_id: u64) -> anyhow::Result<()>;

    fn consumer_count(&self) -> usize;

    /// Schedule a dispatch pass on the queue's executor.
    fn deliver_async(&self);

    /// Iterate over the references currently held.
    fn iterator(&self) -> Box<dyn QueueIterator>;

    /// # Errors
    /// If the acknowledgement cannot be recorded
    fn acknowledge(&self, reference: &MessageReference) -> anyhow::Result<()>;

    /// Stage an acknowledgement inside `tx`.
    ///
    /// # Errors
    /// If the acknowledgement cannot be staged
    fn acknowledge_transactional(
        &self,
        tx: &mut Transaction,
        reference: &MessageReference,
    ) -> anyhow::Result<()>;

    /// Stage the return of a reference inside `tx`.
    ///
    /// # Errors
    /// If the cancellation cannot be staged
    fn cancel(&self, tx: &mut Transaction, reference: &MessageReference) -> anyhow::Result<()>;
}
