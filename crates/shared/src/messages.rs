//! Append-only message persistence
//!
//! Messages are keyed by conversation and read back oldest-first, ordered by
//! `created_at` with the store-assigned `seq` breaking ties. No update or
//! delete is exposed.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{ChatMessage, ConversationId, NewMessage, PrincipalId};

/// History cap used when the caller has no configured limit
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. Rejects empty text with [`StoreError::Validation`].
    async fn append(&self, message: NewMessage) -> StoreResult<ChatMessage>;

    /// The oldest `limit` messages of a conversation, ascending.
    /// Unknown conversations yield an empty list.
    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>>;

    /// Cheap liveness probe for health endpoints
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    seq: i64,
    conversation_id: String,
    sender_id: i64,
    sender_role: String,
    recipient_id: Option<i64>,
    text: String,
    client_message_id: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: row.id,
            seq: row.seq,
            conversation_id: ConversationId::from_canonical(row.conversation_id),
            sender_id: PrincipalId(row.sender_id),
            sender_role: row.sender_role.parse()?,
            recipient_id: row.recipient_id.map(PrincipalId),
            text: row.text,
            client_message_id: row.client_message_id,
            created_at: row.created_at,
        })
    }
}

/// Message store backed by the `chat_messages` table
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewMessage) -> StoreResult<ChatMessage> {
        let message = message.normalized()?;

        // created_at never drops below the conversation's latest timestamp
        let row: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO chat_messages
                (id, conversation_id, sender_id, sender_role, recipient_id, text, client_message_id, created_at)
            VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                GREATEST(
                    clock_timestamp(),
                    COALESCE(
                        (SELECT MAX(created_at) FROM chat_messages WHERE conversation_id = $2),
                        '-infinity'::timestamptz
                    )
                )
            )
            RETURNING id, seq, conversation_id, sender_id, sender_role, recipient_id,
                      text, client_message_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(message.conversation_id.as_str())
        .bind(message.sender.id.0)
        .bind(message.sender.role.as_str())
        .bind(message.recipient_id.map(|id| id.0))
        .bind(&message.text)
        .bind(message.client_message_id.as_deref())
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, seq, conversation_id, sender_id, sender_role, recipient_id,
                   text, client_message_id, created_at
            FROM chat_messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, seq ASC
            LIMIT $2
            "#,
        )
        .bind(conversation_id.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryLog {
    conversations: HashMap<ConversationId, Vec<ChatMessage>>,
    next_seq: i64,
}

/// Process-local message store for tests and `STORAGE_BACKEND=memory` runs
#[derive(Default)]
pub struct MemoryMessageStore {
    log: RwLock<MemoryLog>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages across all conversations
    pub async fn len(&self) -> usize {
        let log = self.log.read().await;
        log.conversations.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, message: NewMessage) -> StoreResult<ChatMessage> {
        let message = message.normalized()?;

        let mut log = self.log.write().await;
        log.next_seq += 1;
        let seq = log.next_seq;

        let entries = log.conversations.entry(message.conversation_id.clone()).or_default();
        let now = OffsetDateTime::now_utc();
        let created_at = match entries.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let stored = ChatMessage {
            id: Uuid::new_v4(),
            seq,
            conversation_id: message.conversation_id,
            sender_id: message.sender.id,
            sender_role: message.sender.role,
            recipient_id: message.recipient_id,
            text: message.text,
            client_message_id: message.client_message_id,
            created_at,
        };
        entries.push(stored.clone());

        Ok(stored)
    }

    async fn history(
        &self,
        conversation_id: &ConversationId,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        let log = self.log.read().await;
        Ok(log
            .conversations
            .get(conversation_id)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
