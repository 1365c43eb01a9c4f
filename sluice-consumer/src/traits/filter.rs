use std::fmt;

use crate::message::ServerMessage;

/// A consumer-side message selector.
///
/// Evaluation semantics belong to the routing layer; the engine only asks
/// whether a message matches.
pub trait Filter: Send + Sync + fmt::Debug {
    fn matches(&self, message: &ServerMessage) -> bool;

    /// The selector as the client expressed it.
    fn filter_string(&self) -> &str;
}
