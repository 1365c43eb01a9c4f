//! Admission of offered references and the chunked-transfer driver.

use std::sync::atomic::Ordering;

use sluice_common::{internal, outgoing};
use tracing::{error, warn};

use super::{DeliveryEngine, LargeSlot};
use crate::{
    chunked::{ChunkSink, ChunkedTransfer, Progress},
    error::{ConsumerError, Result},
    message::DeletionHold,
    reference::MessageReference,
    traits::HandleStatus,
};

impl DeliveryEngine {
    /// Decide whether `reference` is delivered to this consumer now.
    ///
    /// Checks run in a fixed order: credit, write readiness, started and not
    /// transferring, no chunked transfer active, filter. Only after every
    /// check passes is the reference recorded and sent.
    pub(super) fn handle_reference(&self, reference: &MessageReference) -> Result<HandleStatus> {
        if !self.credits.has_credit() {
            internal!(
                "Consumer {} has no credit for message {}",
                self.id,
                reference.message_id()
            );
            return Ok(HandleStatus::Busy);
        }

        if self.config.respect_write_readiness && !self.write_ready.load(Ordering::Acquire) {
            return Ok(HandleStatus::Busy);
        }

        let mut state = self.state.lock();

        if !state.started || state.transferring || !state.large.is_idle() {
            return Ok(HandleStatus::Busy);
        }

        let message = reference.message();
        if let Some(filter) = &self.options.filter
            && !filter.matches(message)
        {
            return Ok(HandleStatus::NoMatch);
        }

        let pre_ack_hold = if self.options.browse_only {
            None
        } else {
            self.record_delivery(reference)?
        };

        if let Some(body) = message.large_body() {
            let transfer = ChunkedTransfer::new(reference.clone(), body.clone(), pre_ack_hold);
            state.large = LargeSlot::Parked(Box::new(transfer));
            self.transfer_idle.send_replace(false);
            drop(state);

            // The header goes out on the admitting thread; the body follows
            // on the executor.
            self.resume_large_message();
        } else {
            drop(state);
            self.deliver_standard(reference);
        }

        Ok(HandleStatus::Handled)
    }

    /// Ledger entry, delivery count, strict persistence and pre-acknowledge.
    ///
    /// Undone if any of it fails, so a refused reference stays with the queue
    /// exactly as it was offered.
    fn record_delivery(&self, reference: &MessageReference) -> Result<Option<DeletionHold>> {
        let tracked = !self.options.pre_acknowledge;
        if tracked && !self.ledger.push(reference.clone()) {
            return Err(ConsumerError::DuplicateReference {
                consumer_id: self.id,
                message_id: reference.message_id(),
            });
        }

        reference.handled();
        reference.increment_delivery_count();

        let recorded = self.persist_and_pre_acknowledge(reference);
        if recorded.is_err() {
            reference.decrement_delivery_count();
            if tracked {
                self.ledger.remove(reference.message_id());
            }
        }

        recorded
    }

    fn persist_and_pre_acknowledge(
        &self,
        reference: &MessageReference,
    ) -> Result<Option<DeletionHold>> {
        let message = reference.message();
        let queue = &self.context.queue;

        if self.options.strict_update_delivery_count
            && message.is_durable()
            && queue.is_durable()
            && !queue.is_internal()
        {
            self.context.storage.update_delivery_count(reference)?;
        }

        if !self.options.pre_acknowledge {
            return Ok(None);
        }

        // The queue drops its own hold on acknowledgement; this one keeps the
        // body readable until the transfer is done with it.
        let hold = message.large_body().map(DeletionHold::acquire);
        queue.acknowledge(reference)?;

        Ok(hold)
    }

    fn deliver_standard(&self, reference: &MessageReference) {
        let size = self.context.callback.send_message(
            reference.message(),
            self.id,
            reference.delivery_count(),
        );
        self.credits.debit(size);

        outgoing!(
            "Consumer {} sent message {} ({} bytes, delivery {})",
            self.id,
            reference.message_id(),
            size,
            reference.delivery_count()
        );
    }

    /// Write the next frame of the active chunked transfer.
    ///
    /// The transfer is checked out of its slot while the frame is written and
    /// parked again afterwards, unless it finished or the consumer closed in
    /// the meantime. When the slot becomes idle the queue may offer the next
    /// reference.
    pub(super) fn resume_large_message(&self) {
        let mut transfer = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut state.large, LargeSlot::Writing { abort: false }) {
                LargeSlot::Parked(transfer) => transfer,
                other => {
                    let idle = other.is_idle();
                    state.large = other;
                    drop(state);

                    // A stale continuation for a transfer that already ended.
                    if idle && !self.is_closed() {
                        self.prompt_next();
                    }
                    return;
                }
            }
        };

        let progress = transfer.step(ChunkSink {
            consumer_id: self.id,
            callback: self.context.callback.as_ref(),
            credits: &self.credits,
            chunk_size: self.config.min_large_message_size,
        });

        let mut state = self.state.lock();
        let aborted = matches!(state.large, LargeSlot::Writing { abort: true });

        match progress {
            Ok(Progress::Continue | Progress::Blocked) if aborted => {
                state.large = LargeSlot::Idle;
                self.transfer_idle.send_replace(true);
                drop(state);
                Self::abandon(&mut transfer);
            }
            Ok(Progress::Continue) => {
                state.large = LargeSlot::Parked(transfer);
                drop(state);
                self.schedule_resume();
            }
            Ok(Progress::Blocked) => {
                state.large = LargeSlot::Parked(transfer);
                drop(state);

                // Credit may have arrived between the check in `step` and
                // parking; its prompt would have found the slot checked out.
                if self.credits.has_credit() {
                    self.schedule_resume();
                }
            }
            Ok(Progress::Finished) => {
                state.large = LargeSlot::Idle;
                self.transfer_idle.send_replace(true);
                drop(state);

                internal!(
                    "Consumer {} finished large message {}",
                    self.id,
                    transfer.reference().message_id()
                );
                if !aborted {
                    self.prompt_next();
                }
            }
            Err(err) => {
                state.large = LargeSlot::Idle;
                self.transfer_idle.send_replace(true);
                drop(state);

                error!(
                    "Consumer {} failed to stream large message {}: {err}",
                    self.id,
                    transfer.reference().message_id()
                );

                // Tell the client to discard what it already received.
                if transfer.position().is_some() {
                    let size = self.context.callback.send_large_message_continuation(
                        self.id,
                        &[],
                        false,
                        true,
                    );
                    self.credits.debit(size);
                }
                Self::abandon(&mut transfer);

                if !aborted {
                    self.prompt_next();
                }
            }
        }
    }

    /// Finish a transfer that will not run to completion.
    pub(super) fn abandon(transfer: &mut ChunkedTransfer) {
        if let Err(err) = transfer.finish() {
            warn!(
                "Failed to close encoder for large message {}: {err}",
                transfer.reference().message_id()
            );
        }
    }
}
