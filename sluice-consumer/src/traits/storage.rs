use std::fmt;

use crate::reference::MessageReference;

/// The journal, as seen by a consumer.
pub trait StorageManager: Send + Sync + fmt::Debug {
    /// Durably record the reference's current delivery count.
    ///
    /// # Errors
    /// If the journal write fails
    fn update_delivery_count(&self, reference: &MessageReference) -> anyhow::Result<()>;

    /// A broker-wide unique id for synthetic messages and transactions.
    fn generate_unique_id(&self) -> u64;
}
