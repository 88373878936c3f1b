//! FIFO hand-off queue contract shared by the task and notify queues.

use async_trait::async_trait;

use crate::task::{NotifyMessage, Task};

/// Errors returned by queue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue has been shut down; consumers should stop.
    #[error("Queue closed")]
    Closed,

    /// A transient failure; the operation may be retried.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Whether a consumer should back off and retry rather than stop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Ordered hand-off channel between producers and consumers.
///
/// Implementations must be internally synchronized: any number of tasks may
/// push and pop concurrently, and each pushed item is popped at most once.
#[async_trait]
pub trait Queue<T: Send + 'static>: Send + Sync {
    /// Append an item. Never waits for a consumer.
    async fn push(&self, item: T) -> Result<(), QueueError>;

    /// Remove the oldest item, waiting until one is available.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no
    /// item.
    async fn pop(&self) -> Result<T, QueueError>;
}

/// Producers to workers.
pub type TaskQueue = dyn Queue<Task>;

/// Workers to the notification dispatcher.
pub type NotifyQueue = dyn Queue<NotifyMessage>;
