//! Client registry contract used by the notification dispatcher.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::DbId;

/// Failure to push bytes to a connected client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The client disconnected; its receiving half is gone.
    #[error("Session closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A live handle able to push bytes to exactly one connected user.
#[async_trait]
pub trait ClientSession: Send + Sync {
    async fn send(&self, payload: &[u8]) -> Result<(), DeliveryError>;
}

/// Live directory of deliverable user sessions.
///
/// Sessions are registered and removed by transport code; the dispatcher
/// only looks them up.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn get(&self, user_id: DbId) -> Option<Arc<dyn ClientSession>>;
}
