//! Settlement of in-flight references.

use sluice_common::{incoming, internal};

use super::DeliveryEngine;
use crate::{error::Result, reference::MessageReference, transaction::Transaction};

impl DeliveryEngine {
    /// Acknowledge every in-flight reference up to and including
    /// `message_id`, oldest first.
    ///
    /// With `auto_commit` or no transaction each reference is acknowledged on
    /// the queue immediately; otherwise the acknowledgement is staged in `tx`.
    /// Browse-only consumers ignore acknowledgements.
    ///
    /// # Errors
    ///
    /// [`ReferenceNotFound`](crate::ConsumerError::ReferenceNotFound) when the
    /// ledger runs out before `message_id` is reached. References popped up to
    /// that point stay acknowledged.
    pub fn acknowledge(
        &self,
        auto_commit: bool,
        mut tx: Option<&mut Transaction>,
        message_id: u64,
    ) -> Result<()> {
        if self.options.browse_only {
            return Ok(());
        }

        incoming!(
            "Consumer {} acknowledging up to message {}",
            self.id,
            message_id
        );

        loop {
            let Some(reference) = self.ledger.pop_front() else {
                return Err(self.not_found(message_id));
            };

            self.settle(auto_commit, tx.as_deref_mut(), &reference)?;

            if reference.message_id() == message_id {
                return Ok(());
            }
        }
    }

    /// Acknowledge exactly one in-flight reference, wherever it sits in the
    /// ledger.
    ///
    /// # Errors
    ///
    /// [`ReferenceNotFound`](crate::ConsumerError::ReferenceNotFound) if no
    /// in-flight reference carries `message_id`.
    pub fn individual_acknowledge(
        &self,
        auto_commit: bool,
        tx: Option<&mut Transaction>,
        message_id: u64,
    ) -> Result<()> {
        if self.options.browse_only {
            return Ok(());
        }

        incoming!(
            "Consumer {} acknowledging message {}",
            self.id,
            message_id
        );

        let reference = self
            .remove_reference_by_id(message_id)
            .ok_or_else(|| self.not_found(message_id))?;

        self.settle(auto_commit, tx, &reference)
    }

    /// Take a reference out of the ledger without acknowledging it.
    ///
    /// Always `None` for browse-only consumers.
    pub fn remove_reference_by_id(&self, message_id: u64) -> Option<MessageReference> {
        if self.options.browse_only {
            return None;
        }

        self.ledger.remove(message_id)
    }

    /// Empty the ledger and return its references for the caller to hand
    /// back to the queue, in delivery order.
    ///
    /// With `last_consumed_as_delivered` the oldest reference is acknowledged
    /// instead of returned. Unless `failed`, every returned reference has its
    /// delivery count decremented: the client never processed it.
    ///
    /// # Errors
    ///
    /// Fails if acknowledging the oldest reference fails; nothing has been
    /// decremented at that point.
    pub fn cancel_refs(
        &self,
        failed: bool,
        last_consumed_as_delivered: bool,
        tx: Option<&mut Transaction>,
    ) -> Result<Vec<MessageReference>> {
        let mut references = self.ledger.drain().into_iter();

        if last_consumed_as_delivered
            && !self.options.browse_only
            && let Some(oldest) = references.next()
        {
            self.settle(false, tx, &oldest)?;
        }

        let cancelled: Vec<_> = references
            .inspect(|reference| {
                if !failed {
                    reference.decrement_delivery_count();
                }
            })
            .collect();

        internal!(
            level = DEBUG,
            "Consumer {} cancelled {} references (failed={})",
            self.id,
            cancelled.len(),
            failed
        );

        Ok(cancelled)
    }

    fn settle(
        &self,
        auto_commit: bool,
        tx: Option<&mut Transaction>,
        reference: &MessageReference,
    ) -> Result<()> {
        let queue = &self.context.queue;

        match tx {
            Some(tx) if !auto_commit => queue.acknowledge_transactional(tx, reference)?,
            _ => queue.acknowledge(reference)?,
        }

        Ok(())
    }
}
