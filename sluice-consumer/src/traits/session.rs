use std::fmt;

use crate::message::ServerMessage;

/// The client session owning a consumer.
pub trait Session: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn connection_id(&self) -> &str;

    /// Forget a consumer that has closed.
    fn remove_consumer(&self, consumer_id: u64);
}

/// Outbound transport for one session.
///
/// Every send returns the number of bytes the encoded frame occupies, which
/// is what consumer credits are charged with.
pub trait SessionCallback: Send + Sync + fmt::Debug {
    fn send_message(&self, message: &ServerMessage, consumer_id: u64, delivery_count: u32)
    -> usize;

    /// Announce a large message: headers, total body size and delivery count.
    fn send_large_message(
        &self,
        message: &ServerMessage,
        consumer_id: u64,
        body_size: u64,
        delivery_count: u32,
    ) -> usize;

    /// Send one slice of a large body. `has_more` is `false` on the final slice.
    fn send_large_message_continuation(
        &self,
        consumer_id: u64,
        body: &[u8],
        has_more: bool,
        cancelled: bool,
    ) -> usize;
}
