//! WebSocket event types and serialization
//!
//! Every frame is a JSON text frame shaped `{"event": <name>, "data": <payload>}`.

use parley_shared::{ChatMessage, ConversationId, Participant, Principal, PrincipalId, Role};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Enter a conversation room and receive its history
    Join(JoinRequest),

    /// Leave a conversation room
    Leave(LeaveRequest),

    /// Persist a message and broadcast it to the room
    Message(SendRequest),

    /// Heartbeat ping to keep connection alive
    Ping,
}

/// Either an explicit conversation id or a participant list to derive one from
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<Participant>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "loose_principal")]
    pub recipient_id: Option<PrincipalId>,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

/// An unreadable recipient is treated as absent instead of failing the frame
fn loose_principal<'de, D>(deserializer: D) -> Result<Option<PrincipalId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(PrincipalId::from_json))
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected(ConnectedPayload),

    /// Conversation history, oldest first; sent only to the joiner
    History(Vec<MessagePayload>),

    /// A newly persisted message, sent to every room member
    Message(MessagePayload),

    /// Heartbeat response
    Pong,

    /// Rejected event (only when rejection notices are enabled)
    Error(ErrorPayload),
}

// =============================================================================
// Event Data Structures
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub session_id: Uuid,
    pub principal: Principal,
}

/// Serialized chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub client_message_id: Option<String>,
    pub conversation_id: ConversationId,
    pub text: String,
    pub sender_id: PrincipalId,
    pub sender_role: Role,
    pub recipient_id: Option<PrincipalId>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<ChatMessage> for MessagePayload {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            client_message_id: message.client_message_id,
            conversation_id: message.conversation_id,
            text: message.text,
            sender_id: message.sender_id,
            sender_role: message.sender_role,
            recipient_id: message.recipient_id,
            timestamp: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
