//! Parley API Library
//!
//! The real-time chat relay: configuration, identity, presence, the
//! WebSocket room manager, and the HTTP surface around it.

pub mod auth;
pub mod config;
pub mod error;
pub mod presence;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;
