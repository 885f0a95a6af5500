use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::models::session::{LoginSession, LoginSessionUpdate, NewLoginSession};

/// Errors raised by a [`SessionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live session matched.
    #[error("login session not found")]
    NotFound,

    /// The stored refresh token no longer matches the update's guard.
    #[error("refresh token changed concurrently")]
    StaleRefreshToken,

    /// A uniqueness constraint (the `token_id`) or the expiry order was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

/// Durable record of active login sessions.
///
/// Every read ignores soft-deleted rows. Updates of one row are atomic: a
/// partial update reads, merges and writes as one unit.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session. Fails if `token_id` is already taken.
    async fn create(&self, session: NewLoginSession) -> Result<LoginSession, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<LoginSession, StoreError>;

    async fn find_by_token_id(&self, token_id: Uuid) -> Result<LoginSession, StoreError>;

    /// Overwrites only the fields `update` carries.
    ///
    /// When `update.expected_refresh_token` is set and no longer matches,
    /// nothing is written and [`StoreError::StaleRefreshToken`] is returned.
    async fn update_partial(
        &self,
        id: i64,
        update: LoginSessionUpdate,
    ) -> Result<LoginSession, StoreError>;

    /// Marks the live session for `token_id` deleted.
    ///
    /// Returns `false` when there was nothing left to delete.
    async fn delete_by_token_id(&self, token_id: Uuid) -> Result<bool, StoreError>;

    /// Replaces the access token and its expiry.
    async fn update_access_token(
        &self,
        id: i64,
        access_token: String,
        expires_at: DateTime<Utc>,
    ) -> Result<LoginSession, StoreError> {
        self.update_partial(
            id,
            LoginSessionUpdate {
                access_token: Some(access_token),
                access_token_expires_at: Some(expires_at),
                ..Default::default()
            },
        )
        .await
    }
}

const SESSION_COLUMNS: &str = "id, token_id, user_id, access_token, refresh_token, \
    access_token_expires_at, refresh_token_expires_at, user_agent, client_ip, \
    last_used_at, created_at, updated_at, deleted_at";

/// Builds a `SELECT` over live sessions only. All reads go through here so the
/// soft-delete filter cannot be forgotten.
fn live_sessions(condition: &str) -> String {
    format!(
        "SELECT {} FROM login_sessions WHERE deleted_at IS NULL AND {}",
        SESSION_COLUMNS, condition
    )
}

/// A [`SessionStore`] backed by the `login_sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        condition: &str,
        param: &(dyn ToSql + Sync),
    ) -> Result<LoginSession, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(live_sessions(condition).as_str(), &[param])
            .await?
            .ok_or(StoreError::NotFound)?;
        Ok(LoginSession::try_from(&row)?)
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: NewLoginSession) -> Result<LoginSession, StoreError> {
        if !session.expiry_order_holds() {
            return Err(StoreError::ConstraintViolation(
                "access token expires after refresh token".to_string(),
            ));
        }

        let client = self.pool.get().await?;
        let query = format!(
            r#"
            INSERT INTO login_sessions (
                token_id, user_id, access_token, refresh_token,
                access_token_expires_at, refresh_token_expires_at, user_agent, client_ip
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );

        let row = client
            .query_one(
                query.as_str(),
                &[
                    &session.token_id,
                    &session.user_id,
                    &session.access_token,
                    &session.refresh_token,
                    &session.access_token_expires_at,
                    &session.refresh_token_expires_at,
                    &session.user_agent,
                    &session.client_ip,
                ],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StoreError::ConstraintViolation(format!(
                        "token_id {} already exists",
                        session.token_id
                    ))
                } else {
                    StoreError::Database(e)
                }
            })?;

        let created = LoginSession::try_from(&row)?;
        tracing::debug!("Login session {} created for user {}", created.id, created.user_id);
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> Result<LoginSession, StoreError> {
        self.find_one("id = $1", &id).await
    }

    async fn find_by_token_id(&self, token_id: Uuid) -> Result<LoginSession, StoreError> {
        self.find_one("token_id = $1", &token_id).await
    }

    async fn update_partial(
        &self,
        id: i64,
        update: LoginSessionUpdate,
    ) -> Result<LoginSession, StoreError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        // Row lock held until commit; concurrent updates of this row queue here.
        let locked = format!("{} FOR UPDATE", live_sessions("id = $1"));
        let row = transaction
            .query_opt(locked.as_str(), &[&id])
            .await?
            .ok_or(StoreError::NotFound)?;

        let mut session = LoginSession::try_from(&row)?;
        if !update.guard_holds(&session) {
            // Dropping the transaction rolls back and releases the lock.
            return Err(StoreError::StaleRefreshToken);
        }
        update.apply_to(&mut session);

        let query = format!(
            r#"
            UPDATE login_sessions
            SET access_token = $2,
                refresh_token = $3,
                access_token_expires_at = $4,
                refresh_token_expires_at = $5,
                last_used_at = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        let row = transaction
            .query_one(
                query.as_str(),
                &[
                    &id,
                    &session.access_token,
                    &session.refresh_token,
                    &session.access_token_expires_at,
                    &session.refresh_token_expires_at,
                    &session.last_used_at,
                ],
            )
            .await?;
        let updated = LoginSession::try_from(&row)?;

        transaction.commit().await?;
        Ok(updated)
    }

    async fn delete_by_token_id(&self, token_id: Uuid) -> Result<bool, StoreError> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                UPDATE login_sessions
                SET deleted_at = NOW(), updated_at = NOW()
                WHERE token_id = $1 AND deleted_at IS NULL
                "#,
                &[&token_id],
            )
            .await?;

        Ok(affected > 0)
    }
}
