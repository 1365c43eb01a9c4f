//! Interfaces of the collaborators surrounding a delivery engine.
//!
//! The engine only talks to its queue, the journal, the owning session, the
//! outbound transport and the management layer through these traits.

mod filter;
mod management;
mod queue;
mod session;
mod storage;

pub use filter::Filter;
pub use management::{ManagementService, Notification};
pub use queue::{Consumer, HandleStatus, Queue, QueueIterator};
pub use session::{Session, SessionCallback};
pub use storage::StorageManager;
