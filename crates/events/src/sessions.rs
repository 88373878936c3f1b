//! Live user sessions, keyed by user id.
//!
//! Transport code (e.g. a WebSocket handler) calls
//! [`SessionRegistry::register`] once the user is known, forwards everything
//! it receives on the returned channel to the socket, and calls
//! [`SessionRegistry::unregister`] on disconnect. The notification
//! dispatcher only ever looks sessions up.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sdpool_core::session::{ClientRegistry, ClientSession, DeliveryError};
use sdpool_core::types::{DbId, Timestamp};
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing payloads to one connected user.
pub type SessionSender = mpsc::UnboundedSender<Vec<u8>>;

/// A registered session: the outbound channel plus bookkeeping.
pub struct ChannelSession {
    pub user_id: DbId,
    sender: SessionSender,
    /// When this session was registered.
    pub connected_at: Timestamp,
}

#[async_trait]
impl ClientSession for ChannelSession {
    async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        self.sender
            .send(payload.to_vec())
            .map_err(|_| DeliveryError::Closed)
    }
}

/// Manages all live sessions.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. One session per user: registering again
/// replaces the previous session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<DbId, Arc<ChannelSession>>>,
}

impl SessionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session for `user_id`.
    ///
    /// Returns the receiver half of the session channel so the caller can
    /// forward payloads to the client. A previous session for the same user
    /// is dropped, which closes its receiver.
    pub async fn register(&self, user_id: DbId) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(ChannelSession {
            user_id,
            sender: tx,
            connected_at: chrono::Utc::now(),
        });
        let replaced = self.sessions.write().await.insert(user_id, session);
        tracing::debug!(user_id, replaced = replaced.is_some(), "Session registered");
        rx
    }

    /// Remove the session for `user_id`, if any.
    pub async fn unregister(&self, user_id: DbId) {
        if self.sessions.write().await.remove(&user_id).is_some() {
            tracing::debug!(user_id, "Session unregistered");
        }
    }

    /// Whether a session is registered for `user_id`.
    pub async fn contains(&self, user_id: DbId) -> bool {
        self.sessions.read().await.contains_key(&user_id)
    }

    /// Return the current number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session, closing all receivers.
    ///
    /// Used during shutdown so transport tasks observe end-of-stream.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        tracing::info!(count, "Closed all client sessions");
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientRegistry for SessionRegistry {
    async fn get(&self, user_id: DbId) -> Option<Arc<dyn ClientSession>> {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .map(|session| Arc::clone(session) as Arc<dyn ClientSession>)
    }
}
