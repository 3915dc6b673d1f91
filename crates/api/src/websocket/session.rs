//! Per-connection session
//!
//! One `Session` exists per authenticated socket. The principal is captured
//! at handshake and never re-read.

use std::collections::HashSet;
use std::sync::Arc;

use parley_shared::{ConversationId, Principal};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;

#[derive(Debug)]
pub struct Session {
    /// Unique id for this socket
    pub session_id: Uuid,

    /// Authenticated principal
    pub principal: Principal,

    /// Outbound queue drained by the socket writer task
    sender: mpsc::UnboundedSender<ServerEvent>,

    /// Conversations this socket has joined
    joined_rooms: Arc<RwLock<HashSet<ConversationId>>>,
}

impl Session {
    pub fn new(principal: Principal, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            principal,
            sender,
            joined_rooms: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Queue an event for this socket
    ///
    /// Returns Err if the socket writer has gone away
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Record a joined room. Returns false if it was already joined.
    pub async fn subscribe(&self, conversation_id: ConversationId) -> bool {
        let mut rooms = self.joined_rooms.write().await;
        let added = rooms.insert(conversation_id.clone());
        tracing::debug!(
            session_id = %self.session_id,
            conversation_id = %conversation_id,
            added,
            "Subscribed to conversation"
        );
        added
    }

    /// Forget a joined room. Returns false if it was not joined.
    pub async fn unsubscribe(&self, conversation_id: &ConversationId) -> bool {
        let mut rooms = self.joined_rooms.write().await;
        let removed = rooms.remove(conversation_id);
        tracing::debug!(
            session_id = %self.session_id,
            conversation_id = %conversation_id,
            removed,
            "Unsubscribed from conversation"
        );
        removed
    }

    pub async fn is_subscribed(&self, conversation_id: &ConversationId) -> bool {
        let rooms = self.joined_rooms.read().await;
        rooms.contains(conversation_id)
    }

    pub async fn joined_rooms(&self) -> HashSet<ConversationId> {
        let rooms = self.joined_rooms.read().await;
        rooms.clone()
    }
}
