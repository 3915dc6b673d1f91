//! Shared application state

use std::sync::Arc;

use parley_shared::{
    create_pool, run_migrations, MemoryMessageStore, MemoryProfileDirectory, MessageStore,
    PgMessageStore, PgProfileDirectory, ProfileDirectory,
};

use crate::auth::{IdentityResolver, JwtManager};
use crate::config::{Config, StorageBackend};
use crate::websocket::{RelaySettings, RoomSessionManager, WebSocketState};

/// State handed to every axum handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<RoomSessionManager>,
    pub ws_state: WebSocketState,
    pub messages: Arc<dyn MessageStore>,
}

impl AppState {
    /// Wire the relay over already-built stores
    pub fn new(
        config: Config,
        messages: Arc<dyn MessageStore>,
        directory: Arc<dyn ProfileDirectory>,
    ) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let ws_state = WebSocketState::new();
        let relay = RoomSessionManager::new(
            IdentityResolver::new(jwt, Arc::clone(&directory)),
            Arc::clone(&messages),
            directory,
            ws_state.clone(),
            RelaySettings::from(&config),
        );

        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
            ws_state,
            messages,
        }
    }

    /// Build the stores named by the configuration
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        match config.storage_backend {
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for postgres storage"))?;

                tracing::info!("Connecting to database...");
                let pool = create_pool(url, config.database_max_connections).await?;
                run_migrations(&pool).await?;
                tracing::info!("Database ready");

                let messages = Arc::new(PgMessageStore::new(pool.clone()));
                let directory = Arc::new(PgProfileDirectory::new(pool));
                Ok(Self::new(config, messages, directory))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; messages are lost on restart");
                let messages = Arc::new(MemoryMessageStore::new());
                let directory = Arc::new(MemoryProfileDirectory::open());
                Ok(Self::new(config, messages, directory))
            }
        }
    }
}
