use std::sync::Arc;

use chrono::{Duration, Utc};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    crypto::token::{IssuedToken, TokenCodec, TokenError, TokenPayload},
    models::{
        session::{LoginSession, LoginSessionUpdate, NewLoginSession},
        user::{NewUser, User},
    },
    repositories::{
        session::{SessionStore, StoreError},
        user::{DirectoryError, UserDirectory},
    },
};

/// Why a login was refused. Kept for logs; clients see one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailure {
    UnknownUser,
    WrongPassword,
}

/// Errors raised by [`AuthService`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials ({0:?})")]
    InvalidCredentials(CredentialFailure),

    #[error("password and confirm password do not match")]
    PasswordMismatch,

    /// The presented token failed verification.
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("login session not found")]
    SessionNotFound,

    /// The presented refresh token is not the one recorded for its session.
    #[error("refresh token does not match the login session")]
    RefreshTokenMismatch,

    #[error("user not found")]
    UserNotFound,

    #[error("session store: {0}")]
    Store(StoreError),

    #[error("user directory: {0}")]
    Directory(DirectoryError),
}

impl From<StoreError> for AuthError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => AuthError::SessionNotFound,
            StoreError::StaleRefreshToken => AuthError::RefreshTokenMismatch,
            other => AuthError::Store(other),
        }
    }
}

impl From<DirectoryError> for AuthError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::NotFound => AuthError::UserNotFound,
            other => AuthError::Directory(other),
        }
    }
}

/// Lifetimes and rotation rules for issued tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Replace the refresh token on every refresh.
    pub rotate_refresh_tokens: bool,
}

/// Where a login came from, recorded on the session for audit.
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata {
    pub user_agent: String,
    pub client_ip: String,
}

/// Registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub confirm_password: String,
}

/// The result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: LoginSession,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// The result of a successful refresh. `refresh` is set only when rotation is on.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub user: User,
    pub session: LoginSession,
    pub access: IssuedToken,
    pub refresh: Option<IssuedToken>,
}

/// Login, registration, refresh and logout over the token codec, the session
/// store and the user directory.
#[derive(Clone)]
pub struct AuthService {
    codec: Arc<TokenCodec>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    policy: TokenPolicy,
}

impl AuthService {
    pub fn new(
        codec: Arc<TokenCodec>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            codec,
            sessions,
            users,
            policy,
        }
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Checks credentials, issues an access/refresh pair sharing a fresh
    /// `token_id` and records the login session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: ClientMetadata,
    ) -> Result<LoginOutcome, AuthError> {
        tracing::debug!("🔐 Authenticating user: {}", username);

        let user = match self.users.get_by_username(username).await {
            Ok(user) => user,
            Err(DirectoryError::NotFound) => {
                // Same Argon2 cost as a wrong password.
                crate::crypto::password::burn_verification(password);
                return Err(AuthError::InvalidCredentials(CredentialFailure::UnknownUser));
            }
            Err(e) => return Err(e.into()),
        };

        match self.users.verify_password(&user, password).await {
            Ok(()) => {}
            Err(DirectoryError::PasswordMismatch) => {
                return Err(AuthError::InvalidCredentials(CredentialFailure::WrongPassword));
            }
            Err(e) => return Err(e.into()),
        }

        let payload = TokenPayload::new(user.id);
        let access = self.codec.issue(&payload, self.policy.access_ttl)?;
        let refresh = self.codec.issue(&payload, self.policy.refresh_ttl)?;

        let session = self
            .sessions
            .create(NewLoginSession {
                token_id: payload.token_id,
                user_id: user.id,
                access_token: access.token.clone(),
                refresh_token: refresh.token.clone(),
                access_token_expires_at: access.payload.expires_at,
                refresh_token_expires_at: refresh.payload.expires_at,
                user_agent: client.user_agent,
                client_ip: client.client_ip,
            })
            .await?;

        tracing::info!("✅ User {} logged in, session {}", user.id, session.id);

        Ok(LoginOutcome {
            user,
            session,
            access,
            refresh,
        })
    }

    /// Creates a user. Does not log them in.
    pub async fn register(&self, registration: Registration) -> Result<User, AuthError> {
        if registration.password != registration.confirm_password {
            return Err(AuthError::PasswordMismatch);
        }

        let user = self
            .users
            .create(NewUser {
                username: registration.username,
                email: registration.email,
                name: registration.name,
                password: registration.password,
            })
            .await?;

        tracing::info!("✅ User registered: {}", user.id);
        Ok(user)
    }

    /// Issues a new access token for the session a refresh token belongs to.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, AuthError> {
        let payload = self.codec.verify(refresh_token)?;

        let session = self.sessions.find_by_token_id(payload.token_id).await?;

        if !bool::from(
            refresh_token
                .as_bytes()
                .ct_eq(session.refresh_token.as_bytes()),
        ) {
            return Err(AuthError::RefreshTokenMismatch);
        }

        let user = self.users.get_by_id(session.user_id).await?;

        // Same token_id: the new tokens keep pointing at this session.
        let access = self.codec.issue(&payload, self.policy.access_ttl)?;
        let refresh = if self.policy.rotate_refresh_tokens {
            Some(self.codec.issue(&payload, self.policy.refresh_ttl)?)
        } else {
            None
        };

        let session = self
            .sessions
            .update_partial(
                session.id,
                LoginSessionUpdate {
                    access_token: Some(access.token.clone()),
                    access_token_expires_at: Some(access.payload.expires_at),
                    refresh_token: refresh.as_ref().map(|issued| issued.token.clone()),
                    refresh_token_expires_at: refresh.as_ref().map(|issued| issued.payload.expires_at),
                    last_used_at: Some(Utc::now()),
                    expected_refresh_token: Some(refresh_token.to_string()),
                },
            )
            .await?;

        tracing::info!("✅ Access token refreshed for session {}", session.id);

        Ok(RefreshOutcome {
            user,
            session,
            access,
            refresh,
        })
    }

    /// Ends the session behind `token_id`. A session that is already gone
    /// counts as logged out.
    pub async fn logout(&self, token_id: Uuid) -> Result<(), AuthError> {
        if self.sessions.delete_by_token_id(token_id).await? {
            tracing::info!("👋 Login session {} terminated", token_id);
        } else {
            tracing::debug!("Login session {} was already terminated", token_id);
        }
        Ok(())
    }
}
