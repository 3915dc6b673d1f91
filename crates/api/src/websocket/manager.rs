//! Room session manager
//!
//! Owns the lifecycle of every authenticated socket: handshake, room
//! membership, history replay, message persistence + fan-out, and presence.
//! The axum handler only moves frames between the socket and this type.

use std::sync::Arc;

use parley_shared::{
    derive_conversation_id, ConversationId, MessageStore, NewMessage, Participant, Principal,
    PrincipalId, ProfileDirectory, Role, StoreError,
};
use tokio::sync::mpsc;

use crate::auth::{AuthFailure, IdentityResolver};
use crate::config::Config;
use crate::presence::PresenceTracker;

use super::events::{
    ClientEvent, ConnectedPayload, ErrorPayload, JoinRequest, LeaveRequest, MessagePayload,
    SendRequest, ServerEvent,
};
use super::session::Session;
use super::state::WebSocketState;

/// Per-event behaviour knobs
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Cap on messages replayed to a joiner
    pub history_limit: usize,
    /// Reply with `error` frames when a join or message is dropped
    pub rejection_notices: bool,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            history_limit: config.history_limit,
            rejection_notices: config.rejection_notices,
        }
    }
}

/// Identity hints a client may declare on the upgrade request
#[derive(Debug, Clone, Default)]
pub struct HandshakeHints {
    pub user_id: Option<String>,
    pub role: Option<String>,
}

pub struct RoomSessionManager {
    identity: IdentityResolver,
    messages: Arc<dyn MessageStore>,
    directory: Arc<dyn ProfileDirectory>,
    presence: PresenceTracker,
    state: WebSocketState,
    settings: RelaySettings,
}

impl RoomSessionManager {
    pub fn new(
        identity: IdentityResolver,
        messages: Arc<dyn MessageStore>,
        directory: Arc<dyn ProfileDirectory>,
        state: WebSocketState,
        settings: RelaySettings,
    ) -> Self {
        Self {
            identity,
            messages,
            presence: PresenceTracker::new(Arc::clone(&directory)),
            directory,
            state,
            settings,
        }
    }

    pub fn state(&self) -> &WebSocketState {
        &self.state
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// Verify the bearer credential and check it against any declared hints.
    /// Nothing is registered and no presence is written on failure.
    pub async fn authenticate(
        &self,
        credential: Option<&str>,
        hints: &HandshakeHints,
    ) -> Result<Principal, AuthFailure> {
        let token = credential.ok_or(AuthFailure::MissingToken)?;
        let principal = self.identity.resolve(token).await?;

        if let Some(declared) = hints.user_id.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            if declared.parse::<i64>().ok() != Some(principal.id.0) {
                return Err(AuthFailure::PrincipalMismatch {
                    actual: principal.id,
                    declared: declared.to_string(),
                });
            }
        }

        if let Some(declared) = hints.role.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            if declared.parse::<Role>().ok() != Some(principal.role) {
                tracing::info!(
                    user_id = %principal.id,
                    role = %principal.role,
                    declared_role = %declared,
                    "Declared role differs from stored role, using stored role"
                );
            }
        }

        Ok(principal)
    }

    /// Register an authenticated socket and mark its principal online
    pub async fn open_session(
        &self,
        principal: Principal,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Arc<Session> {
        let session = self.state.add_session(Session::new(principal, sender)).await;
        self.presence.set_online(principal.id, true).await;

        let _ = session.send(ServerEvent::Connected(ConnectedPayload {
            session_id: session.session_id,
            principal,
        }));

        session
    }

    /// Tear down a socket. Runs on every close, joined or not.
    pub async fn disconnect(&self, session: &Session) {
        self.state.remove_session(&session.session_id).await;
        self.presence.set_online(session.principal.id, false).await;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.principal.id,
            "WebSocket session closed"
        );
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Decode and dispatch one text frame
    pub async fn handle_text(&self, session: &Arc<Session>, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(session, event).await,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    session_id = %session.session_id,
                    "Failed to parse client event"
                );
                let _ = session.send(ServerEvent::Error(ErrorPayload {
                    code: "invalid_event".to_string(),
                    message: "Invalid event format".to_string(),
                }));
            }
        }
    }

    pub async fn handle_event(&self, session: &Arc<Session>, event: ClientEvent) {
        match event {
            ClientEvent::Join(request) => self.join(session, request).await,
            ClientEvent::Leave(request) => self.leave(session, request).await,
            ClientEvent::Message(request) => self.message(session, request).await,
            ClientEvent::Ping => {
                let _ = session.send(ServerEvent::Pong);
            }
        }
    }

    /// Subscribe to a conversation and replay its history to this socket only
    pub async fn join(&self, session: &Arc<Session>, request: JoinRequest) {
        let Some(conversation_id) =
            resolve_conversation(request.conversation_id.as_deref(), request.participants.as_deref())
        else {
            tracing::warn!(
                session_id = %session.session_id,
                "Join dropped: conversation could not be resolved"
            );
            self.reject(session, "unresolved_conversation", "Conversation could not be resolved");
            return;
        };

        let rooms = &self.state.rooms;
        let gate = rooms.gate(&conversation_id).await;

        let newly_joined = rooms.join(&conversation_id, Arc::clone(session)).await;
        session.subscribe(conversation_id.clone()).await;

        match self.messages.history(&conversation_id, self.settings.history_limit).await {
            Ok(history) => {
                tracing::info!(
                    session_id = %session.session_id,
                    user_id = %session.principal.id,
                    conversation_id = %conversation_id,
                    history_len = history.len(),
                    rejoin = !newly_joined,
                    "Joined conversation"
                );
                let payload = history.into_iter().map(MessagePayload::from).collect();
                let _ = session.send(ServerEvent::History(payload));
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    session_id = %session.session_id,
                    conversation_id = %conversation_id,
                    "History read failed, join rolled back"
                );
                if newly_joined {
                    rooms.leave(&conversation_id, &session.session_id).await;
                    session.unsubscribe(&conversation_id).await;
                    drop(gate);
                    rooms.release(&conversation_id).await;
                }
                self.reject(session, "history_unavailable", "Conversation history is unavailable");
            }
        }
    }

    pub async fn leave(&self, session: &Arc<Session>, request: LeaveRequest) {
        let Some(conversation_id) = request.conversation_id.as_deref().and_then(ConversationId::parse)
        else {
            tracing::debug!(session_id = %session.session_id, "Leave without conversation id");
            return;
        };

        self.state.rooms.leave(&conversation_id, &session.session_id).await;
        if session.unsubscribe(&conversation_id).await {
            tracing::info!(
                session_id = %session.session_id,
                conversation_id = %conversation_id,
                "Left conversation"
            );
        }
    }

    /// Persist a message, then broadcast it to every socket in the room
    pub async fn message(&self, session: &Arc<Session>, request: SendRequest) {
        let Some(conversation_id) =
            resolve_conversation(request.conversation_id.as_deref(), request.participants.as_deref())
        else {
            tracing::warn!(
                session_id = %session.session_id,
                "Message dropped: conversation could not be resolved"
            );
            self.reject(session, "unresolved_conversation", "Conversation could not be resolved");
            return;
        };

        let text = request.text.unwrap_or_default();
        if text.trim().is_empty() {
            tracing::warn!(
                session_id = %session.session_id,
                conversation_id = %conversation_id,
                "Message dropped: empty text"
            );
            self.reject(session, "empty_text", "Message text is empty");
            return;
        }

        let recipient_id = match request.recipient_id {
            Some(id) => self.existing_recipient(id).await,
            None => None,
        };

        let draft = NewMessage {
            conversation_id: conversation_id.clone(),
            sender: session.principal,
            recipient_id,
            text,
            client_message_id: request.client_message_id,
        };

        let rooms = &self.state.rooms;
        let gate = rooms.gate(&conversation_id).await;
        self.persist_and_broadcast(session, &conversation_id, draft).await;
        drop(gate);
        // Senders need not be members, so the room may never have existed
        rooms.release(&conversation_id).await;
    }

    async fn persist_and_broadcast(
        &self,
        session: &Session,
        conversation_id: &ConversationId,
        draft: NewMessage,
    ) {
        match self.messages.append(draft).await {
            Ok(stored) => {
                let message_id = stored.id;
                let delivered = self
                    .state
                    .rooms
                    .broadcast(conversation_id, ServerEvent::Message(stored.into()))
                    .await;
                tracing::info!(
                    message_id = %message_id,
                    conversation_id = %conversation_id,
                    sender_id = %session.principal.id,
                    delivered,
                    "Message relayed"
                );
            }
            Err(StoreError::Validation(reason)) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    conversation_id = %conversation_id,
                    reason = %reason,
                    "Message rejected by store"
                );
                self.reject(session, "invalid_message", &reason);
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    session_id = %session.session_id,
                    conversation_id = %conversation_id,
                    "Failed to persist message"
                );
                self.reject(session, "persistence_failed", "Message could not be saved");
            }
        }
    }

    /// A recipient that no longer exists is dropped from the message.
    /// Lookup failures keep the id and leave the verdict to the store.
    async fn existing_recipient(&self, id: PrincipalId) -> Option<PrincipalId> {
        match self.directory.user_exists(id).await {
            Ok(true) => Some(id),
            Ok(false) => {
                tracing::info!(recipient_id = %id, "Recipient not found, storing without recipient");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, recipient_id = %id, "Recipient lookup failed");
                Some(id)
            }
        }
    }

    fn reject(&self, session: &Session, code: &str, message: &str) {
        if self.settings.rejection_notices {
            let _ = session.send(ServerEvent::Error(ErrorPayload {
                code: code.to_string(),
                message: message.to_string(),
            }));
        }
    }
}

/// A non-blank explicit conversation id wins, even when it is invalid.
/// Participants are only consulted when no id was given.
fn resolve_conversation(
    conversation_id: Option<&str>,
    participants: Option<&[Participant]>,
) -> Option<ConversationId> {
    match conversation_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(explicit) => ConversationId::parse(explicit),
        None => participants.and_then(derive_conversation_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtManager;
    use async_trait::async_trait;
    use parley_shared::{
        ChatMessage, MemoryMessageStore, MemoryProfileDirectory, StoreResult,
        MAX_CONVERSATION_ID_LEN,
    };
    use std::collections::HashSet;

    const SECRET: &str = "test-secret-key-at-least-32-chars!";
    const ROOM: &str = "conversation:operator-7:user-42";

    /// Wraps the memory store and fails on demand
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryMessageStore,
        fail_history: bool,
        fail_append: bool,
    }

    #[async_trait]
    impl MessageStore for FlakyStore {
        async fn append(&self, message: NewMessage) -> StoreResult<ChatMessage> {
            if self.fail_append {
                return Err(StoreError::Database("connection reset".to_string()));
            }
            self.inner.append(message).await
        }

        async fn history(
            &self,
            conversation_id: &ConversationId,
            limit: usize,
        ) -> StoreResult<Vec<ChatMessage>> {
            if self.fail_history {
                return Err(StoreError::Database("connection reset".to_string()));
            }
            self.inner.history(conversation_id, limit).await
        }
    }

    struct Harness {
        manager: Arc<RoomSessionManager>,
        directory: Arc<MemoryProfileDirectory>,
        jwt: JwtManager,
    }

    type Client = (Arc<Session>, mpsc::UnboundedReceiver<ServerEvent>);

    impl Harness {
        async fn new(messages: Arc<dyn MessageStore>, rejection_notices: bool) -> Self {
            let directory = Arc::new(MemoryProfileDirectory::new());
            directory.add_user(PrincipalId(7), Some(Role::Operator)).await;
            directory.add_user(PrincipalId(42), None).await;
            directory.add_user(PrincipalId(43), None).await;

            let jwt = JwtManager::new(SECRET, 1);
            let manager = RoomSessionManager::new(
                IdentityResolver::new(jwt.clone(), directory.clone()),
                messages,
                directory.clone(),
                WebSocketState::new(),
                RelaySettings {
                    history_limit: 200,
                    rejection_notices,
                },
            );

            Self {
                manager: Arc::new(manager),
                directory,
                jwt,
            }
        }

        async fn memory() -> Self {
            Self::new(Arc::new(MemoryMessageStore::new()), false).await
        }

        async fn connect(&self, id: i64) -> Client {
            let (token, _) = self.jwt.generate_access_token(PrincipalId(id)).unwrap();
            let principal = self
                .manager
                .authenticate(Some(&token), &HandshakeHints::default())
                .await
                .unwrap();

            let (tx, mut rx) = mpsc::unbounded_channel();
            let session = self.manager.open_session(principal, tx).await;
            assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Connected(_)));
            (session, rx)
        }

        async fn join(&self, client: &mut Client) -> Vec<MessagePayload> {
            self.manager
                .join(
                    &client.0,
                    JoinRequest {
                        conversation_id: Some(ROOM.to_string()),
                        participants: None,
                    },
                )
                .await;
            match client.1.try_recv().unwrap() {
                ServerEvent::History(history) => history,
                other => panic!("Expected history, got {other:?}"),
            }
        }

        async fn say(&self, client: &Client, text: &str) {
            self.manager
                .message(
                    &client.0,
                    SendRequest {
                        conversation_id: Some(ROOM.to_string()),
                        text: Some(text.to_string()),
                        recipient_id: Some(PrincipalId(42)),
                        ..Default::default()
                    },
                )
                .await;
        }
    }

    fn next_message(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> MessagePayload {
        match rx.try_recv().unwrap() {
            ServerEvent::Message(message) => message,
            other => panic!("Expected message, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------------
    // Handshake
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_authenticate_requires_credential() {
        let harness = Harness::memory().await;
        let result = harness.manager.authenticate(None, &HandshakeHints::default()).await;
        assert!(matches!(result, Err(AuthFailure::MissingToken)));
        assert_eq!(harness.manager.state().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_authenticate_checks_user_id_hint() {
        let harness = Harness::memory().await;
        let (token, _) = harness.jwt.generate_access_token(PrincipalId(42)).unwrap();

        let matching = HandshakeHints {
            user_id: Some("42".to_string()),
            role: None,
        };
        let principal = harness.manager.authenticate(Some(&token), &matching).await.unwrap();
        assert_eq!(principal, Principal::new(42, Role::User));

        let mismatched = HandshakeHints {
            user_id: Some("7".to_string()),
            role: None,
        };
        assert!(matches!(
            harness.manager.authenticate(Some(&token), &mismatched).await,
            Err(AuthFailure::PrincipalMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_authenticate_ignores_role_hint() {
        let harness = Harness::memory().await;
        let (token, _) = harness.jwt.generate_access_token(PrincipalId(42)).unwrap();
        let hints = HandshakeHints {
            user_id: None,
            role: Some("admin".to_string()),
        };

        let principal = harness.manager.authenticate(Some(&token), &hints).await.unwrap();
        assert_eq!(principal.role, Role::User);
    }

    #[tokio::test]
    async fn test_open_session_marks_presence_online() {
        let harness = Harness::memory().await;
        let (session, _rx) = harness.connect(42).await;

        assert_eq!(harness.directory.is_online(PrincipalId(42)).await, Some(true));
        assert_eq!(session.principal, Principal::new(42, Role::User));
        assert_eq!(harness.manager.state().session_count().await, 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_join_marks_offline() {
        let harness = Harness::memory().await;
        let (session, _rx) = harness.connect(42).await;

        harness.manager.disconnect(&session).await;

        assert_eq!(harness.directory.is_online(PrincipalId(42)).await, Some(false));
        assert_eq!(harness.manager.state().session_count().await, 0);
    }

    // -------------------------------------------------------------------------
    // Join / leave
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_participant_order_resolves_same_room() {
        let harness = Harness::memory().await;
        let mut operator = harness.connect(7).await;
        let mut user = harness.connect(42).await;

        let request = |a: Participant, b: Participant| JoinRequest {
            conversation_id: None,
            participants: Some(vec![a, b]),
        };
        harness
            .manager
            .join(&operator.0, request(Participant::new(7, Role::Operator), Participant::new(42, Role::User)))
            .await;
        harness
            .manager
            .join(&user.0, request(Participant::new(42, Role::User), Participant::new(7, Role::Operator)))
            .await;

        let room = ConversationId::parse(ROOM).unwrap();
        assert_eq!(harness.manager.state().rooms.get_room_size(&room).await, 2);
        assert!(operator.0.is_subscribed(&room).await);
        assert!(matches!(operator.1.try_recv().unwrap(), ServerEvent::History(_)));
        assert!(matches!(user.1.try_recv().unwrap(), ServerEvent::History(_)));
    }

    #[tokio::test]
    async fn test_unresolvable_join_is_a_no_op() {
        let harness = Harness::memory().await;
        let mut client = harness.connect(42).await;

        harness
            .manager
            .join(
                &client.0,
                JoinRequest {
                    conversation_id: None,
                    participants: Some(vec![Participant::new(42, Role::User)]),
                },
            )
            .await;

        assert!(client.1.try_recv().is_err());
        assert_eq!(harness.manager.state().rooms.get_room_count().await, 0);
        assert!(client.0.joined_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_replays_prior_messages_then_live() {
        let harness = Harness::memory().await;
        let operator = harness.connect(7).await;
        for text in ["one", "two", "three"] {
            harness.say(&operator, text).await;
        }

        let mut user = harness.connect(42).await;
        let history = harness.join(&mut user).await;
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        harness.say(&operator, "four").await;
        assert_eq!(next_message(&mut user.1).text, "four");
        assert!(user.1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejoin_gets_history_again() {
        let harness = Harness::memory().await;
        let mut user = harness.connect(42).await;
        harness.say(&user, "hello").await;

        assert_eq!(harness.join(&mut user).await.len(), 1);
        assert_eq!(harness.join(&mut user).await.len(), 1);
        let room = ConversationId::parse(ROOM).unwrap();
        assert_eq!(harness.manager.state().rooms.get_room_size(&room).await, 1);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery_and_is_idempotent() {
        let harness = Harness::memory().await;
        let operator = harness.connect(7).await;
        let mut user = harness.connect(42).await;
        harness.join(&mut user).await;

        let leave = || LeaveRequest {
            conversation_id: Some(ROOM.to_string()),
        };
        harness.manager.leave(&user.0, leave()).await;
        harness.manager.leave(&user.0, leave()).await;

        harness.say(&operator, "anyone there?").await;
        assert!(user.1.try_recv().is_err());
        assert_eq!(harness.manager.state().rooms.get_room_count().await, 0);
    }

    #[tokio::test]
    async fn test_history_failure_rolls_back_join() {
        let store = FlakyStore {
            fail_history: true,
            ..Default::default()
        };
        let harness = Harness::new(Arc::new(store), true).await;
        let mut user = harness.connect(42).await;

        harness
            .manager
            .join(
                &user.0,
                JoinRequest {
                    conversation_id: Some(ROOM.to_string()),
                    participants: None,
                },
            )
            .await;

        match user.1.try_recv().unwrap() {
            ServerEvent::Error(error) => assert_eq!(error.code, "history_unavailable"),
            other => panic!("Expected error, got {other:?}"),
        }
        assert!(user.0.joined_rooms().await.is_empty());
        assert_eq!(harness.manager.state().rooms.get_room_count().await, 0);
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_message_reaches_room_including_sender() {
        let harness = Harness::memory().await;
        let mut operator = harness.connect(7).await;
        let mut user = harness.connect(42).await;
        let mut outsider = harness.connect(43).await;
        harness.join(&mut operator).await;
        harness.join(&mut user).await;

        harness
            .manager
            .message(
                &operator.0,
                SendRequest {
                    participants: Some(vec![
                        Participant::new(42, Role::User),
                        Participant::new(7, Role::Operator),
                    ]),
                    text: Some("  hello there  ".to_string()),
                    recipient_id: Some(PrincipalId(42)),
                    client_message_id: Some("c-1".to_string()),
                    ..Default::default()
                },
            )
            .await;

        let echoed = next_message(&mut operator.1);
        let received = next_message(&mut user.1);
        assert_eq!(echoed, received);
        assert_eq!(received.text, "hello there");
        assert_eq!(received.sender_id, PrincipalId(7));
        assert_eq!(received.sender_role, Role::Operator);
        assert_eq!(received.recipient_id, Some(PrincipalId(42)));
        assert_eq!(received.client_message_id.as_deref(), Some("c-1"));
        assert_eq!(received.conversation_id.as_str(), ROOM);
        assert!(outsider.1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_whitespace_message_is_dropped() {
        let messages = Arc::new(MemoryMessageStore::new());
        let harness = Harness::new(messages.clone(), false).await;
        let mut user = harness.connect(42).await;
        harness.join(&mut user).await;

        harness.say(&user, " \n\t ").await;

        assert!(messages.is_empty().await);
        assert!(user.1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejection_notice_when_enabled() {
        let harness = Harness::new(Arc::new(MemoryMessageStore::new()), true).await;
        let mut user = harness.connect(42).await;

        harness.say(&user, "   ").await;

        match user.1.try_recv().unwrap() {
            ServerEvent::Error(error) => assert_eq!(error.code, "empty_text"),
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deleted_recipient_is_nulled() {
        let harness = Harness::memory().await;
        let mut operator = harness.connect(7).await;
        harness.join(&mut operator).await;
        harness.directory.remove_user(PrincipalId(42)).await;

        harness.say(&operator, "are you still there?").await;

        let message = next_message(&mut operator.1);
        assert_eq!(message.recipient_id, None);
        assert_eq!(message.text, "are you still there?");
    }

    #[tokio::test]
    async fn test_messages_keep_send_order() {
        let messages = Arc::new(MemoryMessageStore::new());
        let harness = Harness::new(messages.clone(), false).await;
        let mut operator = harness.connect(7).await;
        let mut user = harness.connect(42).await;
        harness.join(&mut user).await;

        harness.say(&operator, "M1").await;
        harness.say(&operator, "M2").await;

        assert_eq!(next_message(&mut user.1).text, "M1");
        assert_eq!(next_message(&mut user.1).text, "M2");

        let later: Vec<_> = harness.join(&mut operator).await.into_iter().map(|m| m.text).collect();
        assert_eq!(later, vec!["M1", "M2"]);
    }

    #[tokio::test]
    async fn test_numeric_string_recipient_is_kept() {
        let messages = Arc::new(MemoryMessageStore::new());
        let harness = Harness::new(messages.clone(), false).await;
        let mut operator = harness.connect(7).await;
        harness.join(&mut operator).await;

        let frame = format!(
            r#"{{"event":"message","data":{{"conversationId":"{ROOM}","text":"hi","recipientId":"42"}}}}"#
        );
        harness.manager.handle_text(&operator.0, &frame).await;

        let message = next_message(&mut operator.1);
        assert_eq!(message.text, "hi");
        assert_eq!(message.recipient_id, Some(PrincipalId(42)));
        assert_eq!(messages.len().await, 1);
    }

    #[tokio::test]
    async fn test_messages_to_unjoined_rooms_leave_no_gates() {
        let harness = Harness::memory().await;
        let operator = harness.connect(7).await;

        for i in 0..20 {
            harness
                .manager
                .message(
                    &operator.0,
                    SendRequest {
                        conversation_id: Some(format!("room-{i}")),
                        text: Some("anyone?".to_string()),
                        ..Default::default()
                    },
                )
                .await;
        }
        harness.manager.disconnect(&operator.0).await;

        let rooms = &harness.manager.state().rooms;
        assert_eq!(rooms.get_room_count().await, 0);
        assert_eq!(rooms.gate_count().await, 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_broadcasts_nothing() {
        let store = FlakyStore {
            fail_append: true,
            ..Default::default()
        };
        let harness = Harness::new(Arc::new(store), false).await;
        let mut operator = harness.connect(7).await;
        let mut user = harness.connect(42).await;
        harness.join(&mut operator).await;
        harness.join(&mut user).await;

        harness.say(&operator, "lost").await;

        assert!(operator.1.try_recv().is_err());
        assert!(user.1.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_join_sees_each_message_once() {
        let harness = Harness::memory().await;
        let operator = harness.connect(7).await;
        let mut user = harness.connect(42).await;

        let sender = {
            let manager = Arc::clone(&harness.manager);
            let session = Arc::clone(&operator.0);
            tokio::spawn(async move {
                for i in 0..50 {
                    manager
                        .message(
                            &session,
                            SendRequest {
                                conversation_id: Some(ROOM.to_string()),
                                text: Some(format!("m{i}")),
                                ..Default::default()
                            },
                        )
                        .await;
                }
            })
        };
        tokio::task::yield_now().await;
        harness
            .manager
            .join(
                &user.0,
                JoinRequest {
                    conversation_id: Some(ROOM.to_string()),
                    participants: None,
                },
            )
            .await;
        sender.await.unwrap();

        let mut seen = match user.1.try_recv().unwrap() {
            ServerEvent::History(history) => history,
            other => panic!("Expected history, got {other:?}"),
        };
        while let Ok(event) = user.1.try_recv() {
            match event {
                ServerEvent::Message(message) => seen.push(message),
                other => panic!("Unexpected event {other:?}"),
            }
        }

        let texts: Vec<_> = seen.iter().map(|m| m.text.clone()).collect();
        let expected: Vec<_> = (0..50).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
        assert_eq!(seen.iter().map(|m| m.id).collect::<HashSet<_>>().len(), 50);
    }

    #[tokio::test]
    async fn test_handle_text_ping_and_garbage() {
        let harness = Harness::memory().await;
        let mut client = harness.connect(42).await;

        harness.manager.handle_text(&client.0, r#"{"event":"ping"}"#).await;
        assert_eq!(client.1.try_recv().unwrap(), ServerEvent::Pong);

        harness.manager.handle_text(&client.0, "not json").await;
        match client.1.try_recv().unwrap() {
            ServerEvent::Error(error) => assert_eq!(error.code, "invalid_event"),
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_conversation_prefers_explicit_id() {
        let participants = [Participant::new(1, Role::Admin), Participant::new(2, Role::User)];

        assert_eq!(
            resolve_conversation(Some("support-room"), Some(&participants)).unwrap().as_str(),
            "support-room"
        );
        assert_eq!(
            resolve_conversation(Some("   "), Some(&participants)).unwrap().as_str(),
            "conversation:admin-1:user-2"
        );
        assert!(resolve_conversation(None, None).is_none());
    }

    #[test]
    fn test_invalid_explicit_id_does_not_fall_back() {
        let participants = [Participant::new(1, Role::Admin), Participant::new(2, Role::User)];
        let oversized = "x".repeat(MAX_CONVERSATION_ID_LEN + 1);

        assert!(resolve_conversation(Some(&oversized), Some(&participants)).is_none());
    }

    #[tokio::test]
    async fn test_oversized_conversation_id_is_rejected() {
        let messages = Arc::new(MemoryMessageStore::new());
        let harness = Harness::new(messages.clone(), true).await;
        let mut operator = harness.connect(7).await;
        let oversized = "x".repeat(MAX_CONVERSATION_ID_LEN + 1);

        harness
            .manager
            .message(
                &operator.0,
                SendRequest {
                    conversation_id: Some(oversized),
                    participants: Some(vec![
                        Participant::new(7, Role::Operator),
                        Participant::new(42, Role::User),
                    ]),
                    text: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .await;

        match operator.1.try_recv().unwrap() {
            ServerEvent::Error(error) => assert_eq!(error.code, "unresolved_conversation"),
            other => panic!("Expected error, got {other:?}"),
        }
        assert!(messages.is_empty().await);
    }
}
