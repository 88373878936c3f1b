//! In-process queueing and notification delivery.
//!
//! - [`MemoryQueue`]: FIFO hand-off queue used for both the task queue and
//!   the notify queue.
//! - [`SessionRegistry`]: live directory of connected users, keyed by user
//!   id, that transport code registers sessions into.
//! - [`NotificationDispatcher`]: single consumer forwarding notify-queue
//!   entries to the registry, best-effort and at-most-once.

pub mod dispatch;
pub mod memory_queue;
pub mod sessions;

pub use dispatch::{DispatchStats, NotificationDispatcher};
pub use memory_queue::MemoryQueue;
pub use sessions::{ChannelSession, SessionRegistry};
