use std::sync::Arc;

use crate::{
    config::Config,
    crypto::token::TokenCodec,
    repositories::{
        session::{PgSessionStore, SessionStore},
        user::{PgUserDirectory, UserDirectory},
    },
    services::auth::{AuthService, TokenPolicy},
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Arc<Config>,
    /// Seals and opens tokens with the process-wide key.
    pub codec: Arc<TokenCodec>,
    /// Login session records.
    pub sessions: Arc<dyn SessionStore>,
    /// User records and password checks.
    pub users: Arc<dyn UserDirectory>,
    /// Login, register, refresh and logout.
    pub auth: AuthService,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::create_pool(&config.database_url, config.database_pool_size)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        crate::db::run_migrations(&pool).await?;
        tracing::info!("✅ Database schema is up to date");

        Ok(Self::with_stores(
            config,
            Arc::new(PgSessionStore::new(pool.clone())),
            Arc::new(PgUserDirectory::new(pool)),
        ))
    }

    /// Creates a new `AppState` over the given stores.
    pub fn with_stores(
        config: &Config,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let codec = Arc::new(TokenCodec::new(config.token_key.clone()));
        let auth = AuthService::new(
            codec.clone(),
            sessions.clone(),
            users.clone(),
            TokenPolicy {
                access_ttl: config.access_token_ttl,
                refresh_ttl: config.refresh_token_ttl,
                rotate_refresh_tokens: config.rotate_refresh_tokens,
            },
        );

        AppState {
            config: Arc::new(config.clone()),
            codec,
            sessions,
            users,
            auth,
        }
    }
}
