//! Server-side messages and the large-body abstraction shared with the journal.

use std::{fmt, io, sync::Arc};

use ahash::AHashMap;

/// Property carried by the marker sent from `force_delivery`.
pub const FORCED_DELIVERY_PROPERTY: &str = "_sluice.forced.delivery.seq";

/// A typed message property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Long(i64),
    String(String),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Streams a large body out in slices.
///
/// Implemented by the journal; the engine opens it once, pulls slices in
/// offset order and closes it when the transfer ends or is abandoned.
pub trait BodyEncoder: Send {
    /// Prepare the underlying storage for reading.
    ///
    /// # Errors
    /// If the body cannot be opened
    fn open(&mut self) -> io::Result<()>;

    /// Total number of body bytes this encoder will produce.
    fn large_body_size(&self) -> u64;

    /// Append up to `size` bytes of the body, continuing from the previous call.
    ///
    /// Returns the number of bytes appended.
    ///
    /// # Errors
    /// If the body cannot be read
    fn encode(&mut self, out: &mut Vec<u8>, size: usize) -> io::Result<usize>;

    /// Release the underlying storage.
    ///
    /// # Errors
    /// If closing the body fails
    fn close(&mut self) -> io::Result<()>;
}

/// A message body too large to be buffered whole on the delivery path.
///
/// The deletion-delay count is shared with the journal: while it is above
/// zero the journal must not delete the body, whoever else holds it.
pub trait LargeBody: Send + Sync + fmt::Debug {
    /// Create a fresh encoder positioned at the start of the body.
    fn body_encoder(&self) -> Box<dyn BodyEncoder>;

    fn increment_delay_deletion_count(&self);

    fn decrement_delay_deletion_count(&self);

    /// Drop any cached handles once a delivery of this body is over.
    fn release_resources(&self);
}

/// A deletion-delay hold on a large body.
///
/// Acquiring increments the body's deletion-delay count and dropping
/// decrements it, so each hold is released exactly once.
#[derive(Debug)]
pub struct DeletionHold {
    body: Arc<dyn LargeBody>,
}

impl DeletionHold {
    #[must_use]
    pub fn acquire(body: &Arc<dyn LargeBody>) -> Self {
        body.increment_delay_deletion_count();
        Self { body: body.clone() }
    }
}

impl Drop for DeletionHold {
    fn drop(&mut self) {
        self.body.decrement_delay_deletion_count();
    }
}

/// Message payload.
#[derive(Debug, Clone)]
pub enum MessageBody {
    /// Small enough to be encoded into a single frame.
    Standard(Arc<[u8]>),
    /// Streamed in chunks by a [`BodyEncoder`].
    Large(Arc<dyn LargeBody>),
}

/// A durable (or transient) message as stored by the broker.
///
/// Shared by every queue that routed it; per-queue state lives on the
/// [`MessageReference`](crate::MessageReference).
#[derive(Debug, Clone)]
pub struct ServerMessage {
    id: u64,
    address: String,
    durable: bool,
    properties: AHashMap<String, PropertyValue>,
    body: MessageBody,
}

impl ServerMessage {
    /// Create a non-durable message with an empty standard body
    #[must_use]
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            durable: false,
            properties: AHashMap::new(),
            body: MessageBody::Standard(Arc::from(Vec::new())),
        }
    }

    /// The marker telling a client there is nothing more to deliver right now.
    #[must_use]
    pub fn forced_delivery(id: u64, address: impl Into<String>, sequence: i64) -> Self {
        Self::new(id, address).with_property(FORCED_DELIVERY_PROPERTY, sequence)
    }

    #[must_use]
    pub const fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Arc<[u8]>>) -> Self {
        self.body = MessageBody::Standard(body.into());
        self
    }

    #[must_use]
    pub fn with_large_body(mut self, body: Arc<dyn LargeBody>) -> Self {
        self.body = MessageBody::Large(body);
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn message_id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn is_durable(&self) -> bool {
        self.durable
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    #[must_use]
    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    #[must_use]
    pub const fn is_large_message(&self) -> bool {
        matches!(self.body, MessageBody::Large(_))
    }

    #[must_use]
    pub const fn large_body(&self) -> Option<&Arc<dyn LargeBody>> {
        match &self.body {
            MessageBody::Large(body) => Some(body),
            MessageBody::Standard(_) => None,
        }
    }

    /// The sequence carried by a forced-delivery marker, if this is one.
    #[must_use]
    pub fn forced_delivery_sequence(&self) -> Option<i64> {
        match self.property(FORCED_DELIVERY_PROPERTY) {
            Some(PropertyValue::Long(sequence)) => Some(*sequence),
            _ => None,
        }
    }
}
