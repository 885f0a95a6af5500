use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tokio_postgres::Row;
use uuid::Uuid;

/// One authenticated device or browser session.
///
/// The access and refresh tokens issued at login share `token_id`, which is the
/// key the gate and the refresh flow use to find this row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    /// Surrogate key assigned by the store.
    pub id: i64,
    /// Identifier shared by the token pair. Unique and never reused.
    pub token_id: Uuid,
    /// The user that logged in.
    pub user_id: Uuid,
    /// The current access token.
    pub access_token: String,
    /// The current refresh token.
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
    /// The `User-Agent` seen at login.
    pub user_agent: String,
    /// The client address seen at login.
    pub client_ip: String,
    /// When the session was last refreshed.
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Rows with this set are never returned by a store.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<&Row> for LoginSession {
    type Error = tokio_postgres::Error;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            token_id: row.try_get("token_id")?,
            user_id: row.try_get("user_id")?,
            access_token: row.try_get("access_token")?,
            refresh_token: row.try_get("refresh_token")?,
            access_token_expires_at: row.try_get("access_token_expires_at")?,
            refresh_token_expires_at: row.try_get("refresh_token_expires_at")?,
            user_agent: row.try_get("user_agent")?,
            client_ip: row.try_get("client_ip")?,
            last_used_at: row.try_get("last_used_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

/// The fields supplied when a session is created at login.
#[derive(Debug, Clone)]
pub struct NewLoginSession {
    pub token_id: Uuid,
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user_agent: String,
    pub client_ip: String,
}

impl NewLoginSession {
    /// A new session must not hand out an access token that outlives its
    /// refresh token. Later refreshes are not bound by this.
    pub fn expiry_order_holds(&self) -> bool {
        self.access_token_expires_at <= self.refresh_token_expires_at
    }
}

/// A partial update: `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginSessionUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Apply only if the stored refresh token still equals this one. Checked
    /// by the store under the same lock as the write.
    pub expected_refresh_token: Option<String>,
}

impl LoginSessionUpdate {
    /// Whether the guard in `expected_refresh_token` (if any) holds for
    /// `session`. Compares in constant time.
    pub fn guard_holds(&self, session: &LoginSession) -> bool {
        match &self.expected_refresh_token {
            Some(expected) => bool::from(
                expected
                    .as_bytes()
                    .ct_eq(session.refresh_token.as_bytes()),
            ),
            None => true,
        }
    }

    /// Overwrites the fields of `session` that this update carries.
    pub fn apply_to(&self, session: &mut LoginSession) {
        if let Some(access_token) = &self.access_token {
            session.access_token = access_token.clone();
        }
        if let Some(refresh_token) = &self.refresh_token {
            session.refresh_token = refresh_token.clone();
        }
        if let Some(expires_at) = self.access_token_expires_at {
            session.access_token_expires_at = expires_at;
        }
        if let Some(expires_at) = self.refresh_token_expires_at {
            session.refresh_token_expires_at = expires_at;
        }
        if let Some(last_used_at) = self.last_used_at {
            session.last_used_at = Some(last_used_at);
        }
    }
}
