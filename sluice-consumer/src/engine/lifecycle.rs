//! Credits, start/stop, transfer mode, forced delivery and close.

use std::sync::atomic::Ordering;

use sluice_common::{incoming, internal, outgoing};
use tracing::warn;

use super::{DeliveryEngine, LargeSlot};
use crate::{
    error::Result,
    executor,
    message::ServerMessage,
    reference::MessageReference,
    traits::Notification,
    transaction::Transaction,
};

impl DeliveryEngine {
    /// Apply a credit grant from the client.
    ///
    /// `-1` turns flow control off, `0` stops delivery until more credit
    /// arrives, and a positive value adds that many bytes. Any grant that
    /// unblocks the consumer prompts delivery.
    ///
    /// # Errors
    ///
    /// [`InvalidCredits`](crate::ConsumerError::InvalidCredits) for values
    /// below `-1`.
    pub fn receive_credits(&self, credits: i32) -> Result<()> {
        let update = self.credits.receive(credits)?;

        incoming!(
            "Consumer {} received {} credits ({:?})",
            self.id,
            credits,
            update
        );

        if update.unblocks() {
            self.prompt_delivery();
        }

        Ok(())
    }

    /// Start or stop delivery. Browse-only consumers are always started.
    pub fn set_started(&self, started: bool) {
        let started = self.options.browse_only || started;
        self.state.lock().started = started;

        internal!(level = DEBUG, "Consumer {} started={}", self.id, started);

        if started && !self.is_closed() {
            self.prompt_delivery();
        }
    }

    /// Enter or leave transfer mode.
    ///
    /// Entering it stops new admissions, then waits for an active chunked
    /// transfer to finish and for the queue executor to drain, each bounded
    /// by the flush timeout. Leaving it prompts delivery.
    pub async fn set_transferring(&self, transferring: bool) {
        self.state.lock().transferring = transferring;

        internal!(
            level = DEBUG,
            "Consumer {} transferring={}",
            self.id,
            transferring
        );

        if !transferring {
            self.prompt_delivery();
            return;
        }

        let timeout = self.config.flush_timeout();
        let mut idle = self.transfer_idle.subscribe();
        let finished = tokio::time::timeout(timeout, async move {
            idle.wait_for(|idle| *idle).await.is_ok()
        })
        .await;

        if !matches!(finished, Ok(true)) {
            warn!(
                "Consumer {} timed out waiting for its large message transfer to finish",
                self.id
            );
        }

        if !executor::drain(self.executor.as_ref(), timeout).await {
            warn!(
                "Consumer {} timed out waiting for the queue executor to drain",
                self.id
            );
        }
    }

    /// Push out whatever the queue can deliver, then send a marker message
    /// carrying `sequence` so the client knows it has seen everything that
    /// was deliverable.
    ///
    /// Concurrent calls are serialised. The marker is sent even if the
    /// executor does not drain within the flush timeout.
    pub async fn force_delivery(&self, sequence: i64) {
        let _serial = self.force_lock.lock().await;

        incoming!(
            "Consumer {} forcing delivery (sequence {})",
            self.id,
            sequence
        );

        self.prompt_delivery();

        if !executor::drain(self.executor.as_ref(), self.config.flush_timeout()).await {
            warn!(
                "Consumer {} timed out waiting for the queue executor before forced delivery",
                self.id
            );
        }

        let marker = ServerMessage::forced_delivery(
            self.context.storage.generate_unique_id(),
            self.context.queue.name(),
            sequence,
        );
        let size = self.context.callback.send_message(&marker, self.id, 0);

        outgoing!(
            "Consumer {} sent forced delivery marker {} ({} bytes)",
            self.id,
            sequence,
            size
        );
    }

    /// Record whether the transport can take more writes.
    ///
    /// Only consulted when write readiness is respected by configuration.
    pub fn ready_for_writing(&self, ready: bool) {
        self.write_ready.store(ready, Ordering::Release);

        if ready {
            self.prompt_delivery();
        }
    }

    /// Detach from the queue and session and hand every in-flight reference
    /// back to the queue.
    ///
    /// With `failed` the delivery counts of returned references are left
    /// as they are: the client may have seen them. Closing a closed consumer
    /// is a no-op. A close that fails leaves the consumer stopped but open,
    /// with every reference it could not return still in flight, so it can
    /// be retried.
    ///
    /// # Errors
    ///
    /// Fails if the queue cannot remove the consumer or take the references
    /// back, or the close notification cannot be sent.
    pub fn close(&self, failed: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let closed = self.detach_and_cancel(failed);
        if let Err(err) = &closed {
            warn!(
                consumer_id = self.id,
                "Close of consumer {} on {} failed: {err}",
                self.id,
                self.context.queue.name()
            );
            self.closed.store(false, Ordering::Release);
        }

        closed
    }

    fn detach_and_cancel(&self, failed: bool) -> Result<()> {
        internal!(
            level = DEBUG,
            "Closing consumer {} on queue {} (failed={})",
            self.id,
            self.context.queue.name(),
            failed
        );

        self.set_started(false);
        self.abort_large_message();

        if !self.detached.load(Ordering::Acquire) {
            if let Some(browser) = &self.browser {
                browser.close();
            } else {
                self.context.queue.remove_consumer(self.id)?;
            }
            self.context.session.remove_consumer(self.id);
            self.detached.store(true, Ordering::Release);
        }

        let references = self.cancel_refs(failed, false, None)?;

        let mut tx = Transaction::new(self.context.storage.generate_unique_id());
        for (position, reference) in references.iter().enumerate() {
            if let Err(err) = self.context.queue.cancel(&mut tx, reference) {
                self.restore_refs(failed, &references[position..]);
                tx.rollback()?;
                return Err(err.into());
            }
        }
        tx.rollback()?;

        if !self.options.browse_only {
            let binding = &self.context.binding;
            self.context
                .management
                .send_notification(Notification::ConsumerClosed {
                    address: binding.address.clone(),
                    cluster_name: binding.cluster_name.clone(),
                    routing_name: binding.routing_name.clone(),
                    filter: self
                        .options
                        .filter
                        .as_ref()
                        .map(|filter| filter.filter_string().to_string()),
                    distance: binding.distance,
                    consumer_count: self.context.queue.consumer_count(),
                })?;
        }

        Ok(())
    }

    /// Put references the queue would not take back into the ledger, oldest
    /// first, undoing the delivery-count decrement of a clean close.
    fn restore_refs(&self, failed: bool, references: &[MessageReference]) {
        for reference in references {
            if !failed {
                reference.increment_delivery_count();
            }
            self.ledger.push(reference.clone());
        }
    }

    /// Drop the active chunked transfer, if any.
    ///
    /// A transfer checked out by a writer is flagged instead; the writer
    /// finishes it when its frame is done.
    fn abort_large_message(&self) {
        let mut state = self.state.lock();

        match std::mem::replace(&mut state.large, LargeSlot::Idle) {
            LargeSlot::Idle => {}
            LargeSlot::Writing { .. } => {
                state.large = LargeSlot::Writing { abort: true };
            }
            LargeSlot::Parked(mut transfer) => {
                self.transfer_idle.send_replace(true);
                drop(state);

                internal!(
                    level = DEBUG,
                    "Consumer {} abandoning large message {}",
                    self.id,
                    transfer.reference().message_id()
                );
                Self::abandon(&mut transfer);
            }
        }
    }
}
