use async_trait::async_trait;
use deadpool_postgres::Pool;
use thiserror::Error;
use tokio_postgres::error::SqlState;
use uuid::Uuid;

use crate::{
    crypto::password::{self, PasswordHashError},
    models::user::{NewUser, User},
};

/// Errors raised by a [`UserDirectory`].
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No user matched the lookup.
    #[error("user not found")]
    NotFound,

    /// The supplied password does not match the stored hash.
    #[error("password does not match")]
    PasswordMismatch,

    /// Username or email already taken.
    #[error("{0}")]
    Conflict(String),

    /// Hashing or hash parsing failed.
    #[error(transparent)]
    Hashing(#[from] PasswordHashError),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

/// Lookup and creation of users, plus password checks.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<User, DirectoryError>;

    async fn get_by_username(&self, username: &str) -> Result<User, DirectoryError>;

    /// Stores a new user, hashing `new_user.password`.
    async fn create(&self, new_user: NewUser) -> Result<User, DirectoryError>;

    /// Checks `plaintext` against the user's stored hash.
    async fn verify_password(&self, user: &User, plaintext: &str) -> Result<(), DirectoryError> {
        if password::verify_password(plaintext, &user.password_hash)? {
            Ok(())
        } else {
            Err(DirectoryError::PasswordMismatch)
        }
    }
}

const USER_COLUMNS: &str = "id, username, email, name, password_hash, created_at, updated_at";

/// A [`UserDirectory`] backed by the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Pool,
}

impl PgUserDirectory {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_by_id(&self, id: Uuid) -> Result<User, DirectoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = client
            .query_opt(query.as_str(), &[&id])
            .await?
            .ok_or(DirectoryError::NotFound)?;
        Ok(User::try_from(&row)?)
    }

    async fn get_by_username(&self, username: &str) -> Result<User, DirectoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {} FROM users WHERE username = $1", USER_COLUMNS);
        let row = client
            .query_opt(query.as_str(), &[&username])
            .await?
            .ok_or(DirectoryError::NotFound)?;
        Ok(User::try_from(&row)?)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, DirectoryError> {
        tracing::debug!("🔐 Creating user: {}", new_user.username);
        let password_hash = password::hash_password(&new_user.password)?;

        let client = self.pool.get().await?;
        let query = format!(
            r#"
            INSERT INTO users (username, email, name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = client
            .query_one(
                query.as_str(),
                &[&new_user.username, &new_user.email, &new_user.name, &password_hash],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    DirectoryError::Conflict("username or email already registered".to_string())
                } else {
                    DirectoryError::Database(e)
                }
            })?;

        let user = User::try_from(&row)?;
        tracing::info!("✅ User created with ID: {}", user.id);
        Ok(user)
    }
}
