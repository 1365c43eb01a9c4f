use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::bail;
use parking_lot::Mutex;

use crate::{
    message::{PropertyValue, ServerMessage},
    reference::MessageReference,
    traits::{Filter, ManagementService, Notification, Session, StorageManager},
};

/// A journal that remembers delivery-count updates.
#[derive(Debug)]
pub struct MemoryStorage {
    next_id: AtomicU64,
    updates: Mutex<Vec<(u64, u32)>>,
    fail_updates: AtomicBool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1_000_000),
            updates: Mutex::new(Vec::new()),
            fail_updates: AtomicBool::new(false),
        }
    }
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(message id, delivery count)` for every persisted update, in order.
    #[must_use]
    pub fn delivery_count_updates(&self) -> Vec<(u64, u32)> {
        self.updates.lock().clone()
    }

    /// Make subsequent delivery-count updates fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

impl StorageManager for MemoryStorage {
    fn update_delivery_count(&self, reference: &MessageReference) -> anyhow::Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("journal unavailable");
        }

        self.updates
            .lock()
            .push((reference.message_id(), reference.delivery_count()));
        Ok(())
    }

    fn generate_unique_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// A session that remembers which consumers it was told to forget.
#[derive(Debug)]
pub struct TestSession {
    name: String,
    connection_id: String,
    removed: Mutex<Vec<u64>>,
}

impl TestSession {
    #[must_use]
    pub fn new(name: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection_id: connection_id.into(),
            removed: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn removed_consumers(&self) -> Vec<u64> {
        self.removed.lock().clone()
    }
}

impl Session for TestSession {
    fn name(&self) -> &str {
        &self.name
    }

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn remove_consumer(&self, consumer_id: u64) {
        self.removed.lock().push(consumer_id);
    }
}

#[derive(Debug, Default)]
pub struct RecordingManagement {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingManagement {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl ManagementService for RecordingManagement {
    fn send_notification(&self, notification: Notification) -> anyhow::Result<()> {
        self.notifications.lock().push(notification);
        Ok(())
    }
}

/// Selects messages whose property `key` equals `value`.
#[derive(Debug)]
pub struct PropertyFilter {
    key: String,
    value: PropertyValue,
    expression: String,
}

impl PropertyFilter {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        let key = key.into();
        let value = value.into();
        let expression = match &value {
            PropertyValue::Bool(value) => format!("{key} = {value}"),
            PropertyValue::Long(value) => format!("{key} = {value}"),
            PropertyValue::String(value) => format!("{key} = '{value}'"),
        };

        Self {
            key,
            value,
            expression,
        }
    }
}

impl Filter for PropertyFilter {
    fn matches(&self, message: &ServerMessage) -> bool {
        message.property(&self.key) == Some(&self.value)
    }

    fn filter_string(&self) -> &str {
        &self.expression
    }
}
