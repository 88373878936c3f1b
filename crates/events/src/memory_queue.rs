//! In-process FIFO queue backed by an unbounded `tokio::sync::mpsc` channel.
//!
//! Any number of consumers may call [`Queue::pop`] concurrently; the
//! receiver sits behind an async mutex so each item is handed to exactly
//! one of them. Pushing never waits.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sdpool_core::queue::{Queue, QueueError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Unbounded multi-consumer FIFO queue.
pub struct MemoryQueue<T> {
    name: String,
    sender: mpsc::UnboundedSender<T>,
    receiver: Mutex<mpsc::UnboundedReceiver<T>>,
    closed: CancellationToken,
    len: AtomicUsize,
}

impl<T: Send + 'static> MemoryQueue<T> {
    /// Create an empty queue. `name` is only used in log fields.
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            sender,
            receiver: Mutex::new(receiver),
            closed: CancellationToken::new(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of items pushed but not yet popped.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject further pushes. Consumers drain what is already queued and
    /// then receive [`QueueError::Closed`].
    pub fn close(&self) {
        tracing::info!(queue = %self.name, remaining = self.len(), "Queue closed");
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl<T: Send + 'static> Queue<T> for MemoryQueue<T> {
    async fn push(&self, item: T) -> Result<(), QueueError> {
        if self.closed.is_cancelled() {
            return Err(QueueError::Closed);
        }
        self.len.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(item).is_err() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    async fn pop(&self) -> Result<T, QueueError> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            item = receiver.recv() => match item {
                Some(item) => {
                    self.len.fetch_sub(1, Ordering::AcqRel);
                    Ok(item)
                }
                None => Err(QueueError::Closed),
            },
            _ = self.closed.cancelled() => Err(QueueError::Closed),
        }
    }
}
