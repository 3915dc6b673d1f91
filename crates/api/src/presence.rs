//! Online/offline tracking
//!
//! The flag lives on the external profile record. The relay only writes it;
//! profile listings elsewhere read it. Failures are logged and swallowed so
//! presence never blocks a handshake or a disconnect.

use std::sync::Arc;

use parley_shared::{PrincipalId, ProfileDirectory};

#[derive(Clone)]
pub struct PresenceTracker {
    directory: Arc<dyn ProfileDirectory>,
}

impl PresenceTracker {
    pub fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self { directory }
    }

    pub async fn set_online(&self, principal_id: PrincipalId, online: bool) {
        match self.directory.set_online(principal_id, online).await {
            Ok(changed) => {
                tracing::debug!(
                    user_id = %principal_id,
                    online,
                    changed,
                    "Presence updated"
                );
            }
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    user_id = %principal_id,
                    online,
                    "Failed to update user presence"
                );
            }
        }
    }
}
