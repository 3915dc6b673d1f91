//! Conversation room management for pub/sub
//!
//! A room is the set of sessions subscribed to one conversation. Each
//! conversation also has a gate: an async mutex held while a joiner takes
//! its history snapshot and while a sender appends + broadcasts, so a joiner
//! sees every message exactly once (in the snapshot or live, never neither).

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::ConversationId;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::events::ServerEvent;
use super::session::Session;

/// Held for the duration of a snapshot or an append + broadcast
pub type RoomGate = OwnedMutexGuard<()>;

/// Manages conversation "rooms" for broadcasting events
pub struct RoomManager {
    /// Map of conversation_id -> subscribed sessions
    rooms: Arc<RwLock<HashMap<ConversationId, Vec<Arc<Session>>>>>,

    /// Map of conversation_id -> ordering gate
    gates: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive use of a conversation's ordering gate
    pub async fn gate(&self, conversation_id: &ConversationId) -> RoomGate {
        let gate = {
            let mut gates = self.gates.lock().await;
            Arc::clone(gates.entry(conversation_id.clone()).or_default())
        };
        gate.lock_owned().await
    }

    /// Add a session to a conversation room. Returns false if it was
    /// already a member.
    pub async fn join(&self, conversation_id: &ConversationId, session: Arc<Session>) -> bool {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(conversation_id.clone()).or_default();

        if members.iter().any(|s| s.session_id == session.session_id) {
            return false;
        }
        members.push(Arc::clone(&session));

        tracing::debug!(
            conversation_id = %conversation_id,
            session_id = %session.session_id,
            room_size = members.len(),
            "Session joined conversation room"
        );
        true
    }

    /// Remove a session from a conversation room. Idempotent.
    pub async fn leave(&self, conversation_id: &ConversationId, session_id: &Uuid) {
        let emptied = {
            let mut rooms = self.rooms.write().await;
            match rooms.get_mut(conversation_id) {
                // Already gone; an idle gate may still be waiting to be pruned
                None => true,
                Some(members) => {
                    members.retain(|s| s.session_id != *session_id);
                    if members.is_empty() {
                        rooms.remove(conversation_id);
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            "Removed empty conversation room"
                        );
                        true
                    } else {
                        tracing::debug!(
                            conversation_id = %conversation_id,
                            session_id = %session_id,
                            room_size = members.len(),
                            "Session left conversation room"
                        );
                        false
                    }
                }
            }
        };

        if emptied {
            self.release(conversation_id).await;
        }
    }

    /// Broadcast an event to all sessions in a conversation room
    ///
    /// Silently ignores send errors (closed sockets are cleaned up on disconnect)
    pub async fn broadcast(&self, conversation_id: &ConversationId, event: ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(conversation_id) else {
            tracing::debug!(
                conversation_id = %conversation_id,
                "No subscribers in conversation room"
            );
            return 0;
        };

        let mut success_count = 0;
        let mut failed_count = 0;
        for session in members {
            match session.send(event.clone()) {
                Ok(()) => success_count += 1,
                Err(_) => {
                    failed_count += 1;
                    tracing::warn!(
                        session_id = %session.session_id,
                        "Failed to send event to session (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            recipients = success_count,
            failed = failed_count,
            "Broadcast event to conversation room"
        );
        success_count
    }

    /// Remove a session from all rooms
    pub async fn remove_session(&self, session_id: &Uuid) {
        let emptied = {
            let mut rooms = self.rooms.write().await;
            let mut removed_from = 0;

            for members in rooms.values_mut() {
                let before_len = members.len();
                members.retain(|s| s.session_id != *session_id);
                if members.len() < before_len {
                    removed_from += 1;
                }
            }

            let emptied: Vec<ConversationId> = rooms
                .iter()
                .filter(|(_, members)| members.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            rooms.retain(|_, members| !members.is_empty());

            if removed_from > 0 {
                tracing::debug!(
                    session_id = %session_id,
                    room_count = removed_from,
                    "Removed session from rooms"
                );
            }
            emptied
        };

        self.prune_gates(&emptied).await;
    }

    /// Drop a conversation's gate once it has no room and no holder.
    /// Callers that took a gate without joining must call this after
    /// releasing the guard.
    pub async fn release(&self, conversation_id: &ConversationId) {
        self.prune_gates(std::slice::from_ref(conversation_id)).await;
    }

    /// Drop gates of empty rooms that no task is holding or waiting on.
    /// Gates are only cloned under the `gates` lock, so a strong count of 1
    /// means the map holds the only reference.
    async fn prune_gates(&self, conversation_ids: &[ConversationId]) {
        if conversation_ids.is_empty() {
            return;
        }
        let mut gates = self.gates.lock().await;
        let rooms = self.rooms.read().await;
        for id in conversation_ids {
            let idle = gates.get(id).is_some_and(|gate| Arc::strong_count(gate) == 1);
            if idle && !rooms.contains_key(id) {
                gates.remove(id);
            }
        }
    }

    /// Get room size (number of sessions) for a conversation
    pub async fn get_room_size(&self, conversation_id: &ConversationId) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(conversation_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }

    #[cfg(test)]
    pub(crate) async fn gate_count(&self) -> usize {
        self.gates.lock().await.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
