//! Global WebSocket state management
//!
//! Maintains global state for all sessions and conversation rooms.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::room::RoomManager;
use super::session::Session;

/// Global WebSocket state shared across all sessions
#[derive(Clone)]
pub struct WebSocketState {
    /// All active sessions indexed by session_id
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,

    /// Room manager for conversation subscriptions
    pub rooms: Arc<RoomManager>,
}

impl WebSocketState {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
        }
    }

    /// Register a session
    pub async fn add_session(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id, Arc::clone(&session));

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.principal.id,
            role = %session.principal.role,
            total_connections = sessions.len(),
            "WebSocket session added"
        );

        session
    }

    /// Drop a session and its room memberships. Returns the removed session.
    pub async fn remove_session(&self, session_id: &Uuid) -> Option<Arc<Session>> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(session_id);
            if let Some(session) = &removed {
                tracing::info!(
                    session_id = %session_id,
                    user_id = %session.principal.id,
                    remaining_connections = sessions.len(),
                    "WebSocket session removed"
                );
            }
            removed
        };

        self.rooms.remove_session(session_id).await;
        removed
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    pub async fn get_stats(&self) -> WebSocketStats {
        WebSocketStats {
            active_connections: self.session_count().await,
            active_rooms: self.rooms.get_room_count().await,
        }
    }
}

impl Default for WebSocketState {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about WebSocket sessions
#[derive(Debug, Clone, Serialize)]
pub struct WebSocketStats {
    /// Number of open sockets
    pub active_connections: usize,
    /// Number of conversations with at least one subscriber
    pub active_rooms: usize,
}
