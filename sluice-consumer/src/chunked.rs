//! Streaming of one large message body under the consumer's credit budget.
//!
//! ```text
//! HeaderPending --header sent--> Streaming{offset: 0}
//! Streaming{offset} --chunk sent--> Streaming{offset + len}   (offset < total)
//! Streaming{offset} --last chunk--> Done                      (offset == total)
//! any --finish()--> Done                                      (abandoned)
//! ```
//!
//! Each step performs at most one transport write. The caller decides where
//! the next step runs; the engine always reschedules on the queue executor.

use std::{fmt, io, sync::Arc};

use sluice_common::outgoing;

use crate::{
    credit::CreditController,
    message::{BodyEncoder, DeletionHold, LargeBody},
    reference::MessageReference,
    traits::SessionCallback,
};

enum TransferPhase {
    HeaderPending,
    Streaming {
        encoder: Box<dyn BodyEncoder>,
        offset: u64,
        total: u64,
    },
    Done,
}

/// Result of one [`ChunkedTransfer::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A frame was written and more remain.
    Continue,
    /// No credit; nothing was written.
    Blocked,
    /// The final frame was written and the transfer released its resources.
    Finished,
}

/// Where the outbound frames of a transfer go.
#[derive(Clone, Copy)]
pub struct ChunkSink<'a> {
    pub consumer_id: u64,
    pub callback: &'a dyn SessionCallback,
    pub credits: &'a CreditController,
    pub chunk_size: usize,
}

/// An in-progress delivery of one large message.
pub struct ChunkedTransfer {
    reference: MessageReference,
    body: Arc<dyn LargeBody>,
    phase: TransferPhase,
    holds: Vec<DeletionHold>,
}

impl ChunkedTransfer {
    /// Take a deletion-delay hold on `body` for the duration of the transfer.
    ///
    /// `extra_hold` is a hold taken earlier on the same body (pre-acknowledge)
    /// that must be released together with the transfer's own.
    #[must_use]
    pub fn new(
        reference: MessageReference,
        body: Arc<dyn LargeBody>,
        extra_hold: Option<DeletionHold>,
    ) -> Self {
        let mut holds = vec![DeletionHold::acquire(&body)];
        holds.extend(extra_hold);

        Self {
            reference,
            body,
            phase: TransferPhase::HeaderPending,
            holds,
        }
    }

    #[must_use]
    pub const fn reference(&self) -> &MessageReference {
        &self.reference
    }

    /// Bytes of the body already sent, and its total size once known.
    #[must_use]
    pub const fn position(&self) -> Option<(u64, u64)> {
        match &self.phase {
            TransferPhase::Streaming { offset, total, .. } => Some((*offset, *total)),
            TransferPhase::HeaderPending | TransferPhase::Done => None,
        }
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.phase, TransferPhase::Done)
    }

    /// Write the next frame.
    ///
    /// # Errors
    ///
    /// Fails if the body encoder cannot be opened or read. The transfer is
    /// left unfinished; the caller is expected to [`finish`](Self::finish) it.
    pub fn step(&mut self, sink: ChunkSink<'_>) -> io::Result<Progress> {
        match &mut self.phase {
            TransferPhase::Done => Ok(Progress::Finished),
            TransferPhase::HeaderPending => {
                let mut encoder = self.body.body_encoder();
                let total = encoder.large_body_size();
                encoder.open()?;

                let size = sink.callback.send_large_message(
                    self.reference.message(),
                    sink.consumer_id,
                    total,
                    self.reference.delivery_count(),
                );
                sink.credits.debit(size);
                outgoing!(
                    "Consumer {} sent large message {} header ({} body bytes, {} frame bytes)",
                    sink.consumer_id,
                    self.reference.message_id(),
                    total,
                    size
                );

                self.phase = TransferPhase::Streaming {
                    encoder,
                    offset: 0,
                    total,
                };
                Ok(Progress::Continue)
            }
            TransferPhase::Streaming {
                encoder,
                offset,
                total,
            } => {
                if !sink.credits.has_credit() {
                    return Ok(Progress::Blocked);
                }

                let remaining = *total - *offset;
                let wanted = usize::try_from(remaining)
                    .unwrap_or(usize::MAX)
                    .min(sink.chunk_size);

                let mut chunk = Vec::with_capacity(wanted);
                encoder.encode(&mut chunk, wanted)?;
                if chunk.is_empty() && wanted > 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("large body ended at {offset} of {total} bytes"),
                    ));
                }

                let sent = chunk.len() as u64;
                let has_more = *offset + sent < *total;
                let size = sink.callback.send_large_message_continuation(
                    sink.consumer_id,
                    &chunk,
                    has_more,
                    false,
                );
                sink.credits.debit(size);
                *offset += sent;
                outgoing!(
                    "Consumer {} sent {} bytes of large message {} ({}/{})",
                    sink.consumer_id,
                    sent,
                    self.reference.message_id(),
                    *offset,
                    *total
                );

                if has_more {
                    Ok(Progress::Continue)
                } else {
                    self.finish()?;
                    Ok(Progress::Finished)
                }
            }
        }
    }

    /// Close the encoder and release the body. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the encoder's close error; the body and its deletion-delay
    /// holds are released regardless.
    pub fn finish(&mut self) -> io::Result<()> {
        let closed = match std::mem::replace(&mut self.phase, TransferPhase::Done) {
            TransferPhase::Done => return Ok(()),
            TransferPhase::HeaderPending => Ok(()),
            TransferPhase::Streaming { mut encoder, .. } => encoder.close(),
        };

        self.body.release_resources();
        self.holds.clear();

        closed
    }
}

impl Drop for ChunkedTransfer {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            tracing::warn!(
                message_id = self.reference.message_id(),
                "Failed to close large message encoder: {err}"
            );
        }
    }
}

impl fmt::Debug for ChunkedTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedTransfer")
            .field("reference", &self.reference)
            .field("position", &self.position())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}
