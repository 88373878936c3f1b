//! Notification dispatch loop.
//!
//! Pops [`NotifyMessage`]s and pushes each one to the owning user's live
//! session. Delivery is best-effort and at-most-once: a message for a user
//! with no session, or whose session rejects the send, is dropped without
//! retry. Drops are counted in [`DispatchStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sdpool_core::backoff::{Backoff, BackoffConfig};
use sdpool_core::queue::NotifyQueue;
use sdpool_core::session::ClientRegistry;
use sdpool_core::task::NotifyMessage;
use tokio_util::sync::CancellationToken;

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No session registered for the user.
    NoSession,
    /// The session rejected the payload.
    SendFailed,
}

/// Cumulative delivery counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    delivered: AtomicU64,
    dropped_no_session: AtomicU64,
    dropped_send_failed: AtomicU64,
    pop_errors: AtomicU64,
}

impl DispatchStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped_no_session(&self) -> u64 {
        self.dropped_no_session.load(Ordering::Relaxed)
    }

    pub fn dropped_send_failed(&self) -> u64 {
        self.dropped_send_failed.load(Ordering::Relaxed)
    }

    /// Total messages consumed but not delivered.
    pub fn dropped(&self) -> u64 {
        self.dropped_no_session() + self.dropped_send_failed()
    }

    pub fn pop_errors(&self) -> u64 {
        self.pop_errors.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::NoSession => &self.dropped_no_session,
            DispatchOutcome::SendFailed => &self.dropped_send_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Single consumer of the notify queue.
pub struct NotificationDispatcher {
    notify_queue: Arc<NotifyQueue>,
    registry: Arc<dyn ClientRegistry>,
    stats: Arc<DispatchStats>,
    backoff: BackoffConfig,
}

impl NotificationDispatcher {
    pub fn new(notify_queue: Arc<NotifyQueue>, registry: Arc<dyn ClientRegistry>) -> Self {
        Self {
            notify_queue,
            registry,
            stats: Arc::new(DispatchStats::default()),
            backoff: BackoffConfig::default(),
        }
    }

    /// Override the backoff used after transient pop failures.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Shared handle to the delivery counters.
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Run the dispatch loop until `cancel` fires or the queue closes.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Notification dispatcher started");
        let mut backoff = Backoff::new(self.backoff.clone());

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Notification dispatcher shutting down");
                    break;
                }
                popped = self.notify_queue.pop() => popped,
            };

            match popped {
                Ok(message) => {
                    backoff.reset();
                    self.dispatch(&message).await;
                }
                Err(e) if e.is_transient() => {
                    self.stats.pop_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff.next_sleep();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Notify queue pop failed, backing off",
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::info!(error = %e, "Notify queue closed, dispatcher stopping");
                    break;
                }
            }
        }
    }

    /// Deliver one message. Never fails; the outcome is only recorded.
    pub async fn dispatch(&self, message: &NotifyMessage) -> DispatchOutcome {
        let outcome = match self.registry.get(message.user_id).await {
            None => {
                tracing::debug!(
                    user_id = message.user_id,
                    "No session for user, dropping notification",
                );
                DispatchOutcome::NoSession
            }
            Some(session) => match session.send(message.message.as_bytes()).await {
                Ok(()) => DispatchOutcome::Delivered,
                Err(e) => {
                    tracing::debug!(
                        user_id = message.user_id,
                        error = %e,
                        "Notification send failed, dropping",
                    );
                    DispatchOutcome::SendFailed
                }
            },
        };
        self.stats.record(outcome);
        outcome
    }
}
