//! Flow-controlled delivery from a queue to one client consumer.
//!
//! This crate provides:
//! - Byte-credit flow control per consumer
//! - Chunked streaming of large message bodies under that budget
//! - An ordered ledger of delivered, unacknowledged references
//! - Cumulative and individual acknowledgement, cancellation and close
//! - Read-only browsing that resumes where it left off
//!
//! The surrounding broker (queue, journal, session, transport, management) is
//! reached through the traits in [`traits`]; [`testing`] holds in-memory
//! implementations of them.

mod browser;
mod chunked;
mod config;
mod credit;
mod engine;
mod error;
pub mod executor;
mod ledger;
mod message;
mod reference;
pub mod testing;
pub mod traits;
mod transaction;

pub use browser::BrowseCursor;
pub use chunked::{ChunkSink, ChunkedTransfer, Progress};
pub use config::ConsumerConfig;
pub use credit::{CreditController, CreditUpdate};
pub use engine::{Binding, ConsumerContext, ConsumerOptions, DeliveryEngine};
pub use error::{ConsumerError, Result};
pub use executor::{Executor, SerialExecutor};
pub use ledger::DeliveryLedger;
pub use message::{
    BodyEncoder, DeletionHold, FORCED_DELIVERY_PROPERTY, LargeBody, MessageBody, PropertyValue,
    ServerMessage,
};
pub use reference::MessageReference;
pub use traits::{Consumer, HandleStatus};
pub use transaction::{Transaction, TransactionOperation, TransactionState};
