//! In-process stores for tests and database-less runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    crypto::password,
    models::{
        session::{LoginSession, LoginSessionUpdate, NewLoginSession},
        user::{NewUser, User},
    },
    repositories::{
        session::{SessionStore, StoreError},
        user::{DirectoryError, UserDirectory},
    },
};

#[derive(Default)]
struct SessionTable {
    rows: HashMap<i64, LoginSession>,
    next_id: i64,
}

impl SessionTable {
    /// Rows that have not been soft-deleted. Every read goes through here.
    fn live(&self) -> impl Iterator<Item = &LoginSession> {
        self.rows.values().filter(|session| session.deleted_at.is_none())
    }

    fn live_mut(&mut self, id: i64) -> Option<&mut LoginSession> {
        self.rows
            .get_mut(&id)
            .filter(|session| session.deleted_at.is_none())
    }
}

/// A [`SessionStore`] held in memory behind a lock.
///
/// Each operation runs inside one critical section, which makes partial
/// updates atomic in the same way a row lock does.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    table: Arc<RwLock<SessionTable>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions that are not soft-deleted.
    pub async fn live_count(&self) -> usize {
        self.table.read().await.live().count()
    }

    /// Raw row lookup that ignores the soft-delete marker.
    pub async fn find_including_deleted(&self, id: i64) -> Option<LoginSession> {
        self.table.read().await.rows.get(&id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: NewLoginSession) -> Result<LoginSession, StoreError> {
        if !session.expiry_order_holds() {
            return Err(StoreError::ConstraintViolation(
                "access token expires after refresh token".to_string(),
            ));
        }

        let mut table = self.table.write().await;

        // token_id is never reused, deleted rows included.
        if table.rows.values().any(|row| row.token_id == session.token_id) {
            return Err(StoreError::ConstraintViolation(format!(
                "token_id {} already exists",
                session.token_id
            )));
        }

        table.next_id += 1;
        let now = Utc::now();
        let created = LoginSession {
            id: table.next_id,
            token_id: session.token_id,
            user_id: session.user_id,
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            access_token_expires_at: session.access_token_expires_at,
            refresh_token_expires_at: session.refresh_token_expires_at,
            user_agent: session.user_agent,
            client_ip: session.client_ip,
            last_used_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        table.rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<LoginSession, StoreError> {
        self.table
            .read()
            .await
            .live()
            .find(|session| session.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_token_id(&self, token_id: Uuid) -> Result<LoginSession, StoreError> {
        self.table
            .read()
            .await
            .live()
            .find(|session| session.token_id == token_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_partial(
        &self,
        id: i64,
        update: LoginSessionUpdate,
    ) -> Result<LoginSession, StoreError> {
        let mut table = self.table.write().await;
        let session = table.live_mut(id).ok_or(StoreError::NotFound)?;
        if !update.guard_holds(session) {
            return Err(StoreError::StaleRefreshToken);
        }
        update.apply_to(session);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn delete_by_token_id(&self, token_id: Uuid) -> Result<bool, StoreError> {
        let mut table = self.table.write().await;
        let now = Utc::now();
        let mut deleted = false;
        for session in table
            .rows
            .values_mut()
            .filter(|session| session.token_id == token_id && session.deleted_at.is_none())
        {
            session.deleted_at = Some(now);
            session.updated_at = now;
            deleted = true;
        }
        Ok(deleted)
    }
}

/// A [`UserDirectory`] held in memory.
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops a user outright, as an administrator deleting the account would.
    pub async fn remove(&self, id: Uuid) -> Option<User> {
        self.users.write().await.remove(&id)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_by_id(&self, id: Uuid) -> Result<User, DirectoryError> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn get_by_username(&self, username: &str) -> Result<User, DirectoryError> {
        self.users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, DirectoryError> {
        let password_hash = password::hash_password(&new_user.password)?;
        let mut users = self.users.write().await;

        if users
            .values()
            .any(|user| user.username == new_user.username || user.email == new_user.email)
        {
            return Err(DirectoryError::Conflict(
                "username or email already registered".to_string(),
            ));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            name: new_user.name,
            password_hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }
}
