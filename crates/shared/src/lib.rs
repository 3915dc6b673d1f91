//! Parley Shared Types and Storage
//!
//! Domain types, conversation naming, and the message/profile stores shared
//! by the Parley relay.

pub mod conversation;
pub mod db;
pub mod error;
pub mod messages;
pub mod profiles;
pub mod types;

pub use conversation::{derive as derive_conversation_id, Participant};
pub use db::*;
pub use error::*;
pub use messages::{MemoryMessageStore, MessageStore, PgMessageStore, DEFAULT_HISTORY_LIMIT};
pub use profiles::{MemoryProfileDirectory, PgProfileDirectory, ProfileDirectory};
pub use types::*;
