//! Read/write access to the external account and profile store
//!
//! The relay only needs three things from it: whether an account exists,
//! the account's role (creating a default profile on first contact), and a
//! place to record the online flag.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::types::{PrincipalId, Role};

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Whether an account with this id exists
    async fn user_exists(&self, id: PrincipalId) -> StoreResult<bool>;

    /// Role of the account's profile, creating a `user` profile if absent.
    /// Idempotent.
    async fn ensure_profile(&self, id: PrincipalId) -> StoreResult<Role>;

    /// Write the online flag (creating the profile if needed).
    /// Returns whether the stored value changed.
    async fn set_online(&self, id: PrincipalId, online: bool) -> StoreResult<bool>;
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Directory backed by the `users` and `profiles` tables
#[derive(Clone)]
pub struct PgProfileDirectory {
    pool: PgPool,
}

impl PgProfileDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn user_exists(&self, id: PrincipalId) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    async fn ensure_profile(&self, id: PrincipalId) -> StoreResult<Role> {
        let role: String = sqlx::query_scalar(
            r#"
            WITH inserted AS (
                INSERT INTO profiles (user_id, role)
                VALUES ($1, 'user')
                ON CONFLICT (user_id) DO NOTHING
                RETURNING role
            )
            SELECT role FROM inserted
            UNION ALL
            SELECT role FROM profiles WHERE user_id = $1
            LIMIT 1
            "#,
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;

        role.parse()
    }

    async fn set_online(&self, id: PrincipalId, online: bool) -> StoreResult<bool> {
        self.ensure_profile(id).await?;

        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET is_online = $2, updated_at = NOW()
            WHERE user_id = $1 AND is_online IS DISTINCT FROM $2
            "#,
        )
        .bind(id.0)
        .bind(online)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ProfileRecord {
    role: Role,
    is_online: bool,
}

#[derive(Default)]
struct Directory {
    users: HashSet<PrincipalId>,
    profiles: HashMap<PrincipalId, ProfileRecord>,
}

/// Process-local directory for tests and `STORAGE_BACKEND=memory` runs.
///
/// A strict directory only knows accounts registered with
/// [`MemoryProfileDirectory::add_user`]; an open one treats every id as an
/// existing account.
#[derive(Default)]
pub struct MemoryProfileDirectory {
    open: bool,
    inner: RwLock<Directory>,
}

impl MemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open() -> Self {
        Self {
            open: true,
            inner: RwLock::default(),
        }
    }

    /// Register an account, optionally with an existing profile role
    pub async fn add_user(&self, id: PrincipalId, role: Option<Role>) {
        let mut dir = self.inner.write().await;
        dir.users.insert(id);
        if let Some(role) = role {
            dir.profiles.insert(id, ProfileRecord { role, is_online: false });
        }
    }

    /// Delete an account and its profile
    pub async fn remove_user(&self, id: PrincipalId) {
        let mut dir = self.inner.write().await;
        dir.users.remove(&id);
        dir.profiles.remove(&id);
    }

    pub async fn is_online(&self, id: PrincipalId) -> Option<bool> {
        let dir = self.inner.read().await;
        dir.profiles.get(&id).map(|p| p.is_online)
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfileDirectory {
    async fn user_exists(&self, id: PrincipalId) -> StoreResult<bool> {
        if self.open {
            return Ok(true);
        }
        Ok(self.inner.read().await.users.contains(&id))
    }

    async fn ensure_profile(&self, id: PrincipalId) -> StoreResult<Role> {
        let mut dir = self.inner.write().await;
        let record = dir.profiles.entry(id).or_insert(ProfileRecord {
            role: Role::default(),
            is_online: false,
        });
        Ok(record.role)
    }

    async fn set_online(&self, id: PrincipalId, online: bool) -> StoreResult<bool> {
        let mut dir = self.inner.write().await;
        let record = dir.profiles.entry(id).or_insert(ProfileRecord {
            role: Role::default(),
            is_online: false,
        });
        if record.is_online == online {
            return Ok(false);
        }
        record.is_online = online;
        Ok(true)
    }
}
