//! WebSocket chat relay
//!
//! # Architecture
//!
//! - **Session**: One authenticated socket and the rooms it joined
//! - **Room**: Conversation-based pub/sub plus the per-conversation ordering gate
//! - **State**: Global registry of sessions and rooms
//! - **Manager**: Handshake, join/leave/message handling, presence
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication

pub mod events;
pub mod handler;
pub mod manager;
pub mod room;
pub mod session;
pub mod state;

pub use handler::ws_handler;
pub use manager::{HandshakeHints, RelaySettings, RoomSessionManager};
pub use state::{WebSocketState, WebSocketStats};
