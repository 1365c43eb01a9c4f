//! In-flight references of one consumer, in the order they reached the transport.

use std::collections::VecDeque;

use ahash::AHashSet;
use parking_lot::Mutex;

use crate::reference::MessageReference;

#[derive(Debug, Default)]
struct Entries {
    order: VecDeque<MessageReference>,
    ids: AHashSet<u64>,
}

/// Ordered record of delivered but unacknowledged references.
///
/// Entries leave either as a prefix (cumulative acknowledgement) or by
/// message id (individual acknowledgement, expiry).
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    entries: Mutex<Entries>,
}

impl DeliveryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reference.
    ///
    /// Returns `false` and leaves the ledger untouched if a reference for the
    /// same message is already in flight.
    pub fn push(&self, reference: MessageReference) -> bool {
        let mut entries = self.entries.lock();
        if !entries.ids.insert(reference.message_id()) {
            return false;
        }

        entries.order.push_back(reference);
        true
    }

    /// Remove the oldest entry.
    pub fn pop_front(&self) -> Option<MessageReference> {
        let mut entries = self.entries.lock();
        let reference = entries.order.pop_front()?;
        entries.ids.remove(&reference.message_id());
        Some(reference)
    }

    /// Remove the entry for `message_id`, wherever it sits.
    pub fn remove(&self, message_id: u64) -> Option<MessageReference> {
        let mut entries = self.entries.lock();
        if !entries.ids.remove(&message_id) {
            return None;
        }

        let position = entries
            .order
            .iter()
            .position(|reference| reference.message_id() == message_id)?;
        entries.order.remove(position)
    }

    /// Remove every entry, oldest first.
    pub fn drain(&self) -> Vec<MessageReference> {
        let mut entries = self.entries.lock();
        entries.ids.clear();
        entries.order.drain(..).collect()
    }

    #[must_use]
    pub fn contains(&self, message_id: u64) -> bool {
        self.entries.lock().ids.contains(&message_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().order.is_empty()
    }

    /// Copy of the current entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MessageReference> {
        self.entries.lock().order.iter().cloned().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::message::ServerMessage;

    fn reference(id: u64) -> MessageReference {
        MessageReference::new(Arc::new(ServerMessage::new(id, "orders")), "orders")
    }

    fn ids(references: &[MessageReference]) -> Vec<u64> {
        references.iter().map(MessageReference::message_id).collect()
    }

    #[test]
    fn test_preserves_delivery_order() {
        let ledger = DeliveryLedger::new();
        for id in [5, 3, 9] {
            assert!(ledger.push(reference(id)));
        }

        assert_eq!(ids(&ledger.snapshot()), vec![5, 3, 9]);
        assert_eq!(ledger.pop_front().map(|r| r.message_id()), Some(5));
        assert_eq!(ids(&ledger.drain()), vec![3, 9]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_rejects_duplicates() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.push(reference(1)));
        assert!(!ledger.push(reference(1)));
        assert_eq!(ledger.len(), 1);

        // Once settled the message may be delivered again
        ledger.pop_front();
        assert!(ledger.push(reference(1)));
    }

    #[test]
    fn test_remove_out_of_order() {
        let ledger = DeliveryLedger::new();
        for id in 1..=4 {
            ledger.push(reference(id));
        }

        assert_eq!(ledger.remove(3).map(|r| r.message_id()), Some(3));
        assert!(ledger.remove(3).is_none());
        assert!(!ledger.contains(3));
        assert_eq!(ids(&ledger.snapshot()), vec![1, 2, 4]);
    }
}
