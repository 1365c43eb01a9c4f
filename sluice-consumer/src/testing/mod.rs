//! In-memory collaborators for exercising a [`DeliveryEngine`](crate::DeliveryEngine).
//!
//! - `queue`: a FIFO queue with its own serial executor
//! - `transport`: a session callback that records every frame
//! - `body`: a large message body held in memory
//! - `collaborators`: journal, session, management and filter doubles

mod body;
mod collaborators;
mod queue;
mod transport;

pub use body::MemoryLargeBody;
pub use collaborators::{MemoryStorage, PropertyFilter, RecordingManagement, TestSession};
pub use queue::MemoryQueue;
pub use transport::{Frame, RecordingTransport};
