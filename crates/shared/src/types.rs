//! Common types used across Parley

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreError;

/// Longest conversation id the message table accepts
pub const MAX_CONVERSATION_ID_LEN: usize = 255;

/// Longest client-supplied message token the message table accepts
pub const MAX_CLIENT_MESSAGE_ID_LEN: usize = 128;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Stable identifier of an account in the external account store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(pub i64);

impl PrincipalId {
    /// Read an id sent as a JSON number or numeric string
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self),
            serde_json::Value::String(s) => s.trim().parse().ok().map(Self),
            _ => None,
        }
    }
}

impl From<i64> for PrincipalId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical conversation identifier
///
/// Either supplied verbatim by a client or derived from a participant list
/// by [`crate::conversation::derive`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Accept a caller-supplied id. Blank or oversized ids are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_CONVERSATION_ID_LEN {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub(crate) fn from_canonical(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Role of a principal. Adding a variant also needs the `profiles.role` and
/// `chat_messages.sender_role` CHECK constraints updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::User => "user",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            "user" => Ok(Role::User),
            other => Err(StoreError::Corrupt(format!("unknown role '{other}'"))),
        }
    }
}

// =============================================================================
// Domain Structs
// =============================================================================

/// An authenticated actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<PrincipalId>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

/// A persisted chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    /// Store-assigned insertion sequence, breaks `created_at` ties
    pub seq: i64,
    pub conversation_id: ConversationId,
    pub sender_id: PrincipalId,
    pub sender_role: Role,
    pub recipient_id: Option<PrincipalId>,
    pub text: String,
    pub client_message_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Input to [`crate::messages::MessageStore::append`]
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender: Principal,
    pub recipient_id: Option<PrincipalId>,
    pub text: String,
    pub client_message_id: Option<String>,
}

impl NewMessage {
    /// Trim the text and check the fields against the table limits.
    pub fn normalized(mut self) -> Result<Self, StoreError> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Validation("message text is empty".to_string()));
        }
        if trimmed.len() != self.text.len() {
            self.text = trimmed.to_string();
        }

        self.client_message_id = self.client_message_id.filter(|id| !id.is_empty());
        if let Some(client_id) = &self.client_message_id {
            if client_id.len() > MAX_CLIENT_MESSAGE_ID_LEN {
                return Err(StoreError::Validation(format!(
                    "clientMessageId longer than {MAX_CLIENT_MESSAGE_ID_LEN} bytes"
                )));
            }
        }

        Ok(self)
    }
}
