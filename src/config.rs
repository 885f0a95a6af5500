use std::env;
use std::net::SocketAddr;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use zeroize::Zeroize;

use crate::crypto::aes::{KEY_SIZE, SecureKey};

/// Per-IP throttling applied to the login and register routes.
#[derive(Clone, Copy, Debug)]
pub struct AuthRateLimit {
    /// Seconds between replenished requests.
    pub per_second: u64,
    /// Requests allowed in a burst.
    pub burst_size: u32,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The maximum number of pooled database connections.
    pub database_pool_size: usize,
    /// The address the HTTP server binds to.
    pub http_addr: SocketAddr,
    /// The symmetric key used to seal access and refresh tokens.
    pub token_key: SecureKey,
    /// Lifetime of an access token.
    pub access_token_ttl: Duration,
    /// Lifetime of a refresh token. Never shorter than the access lifetime.
    pub refresh_token_ttl: Duration,
    /// Whether a refresh also replaces the refresh token.
    pub rotate_refresh_tokens: bool,
    /// Domain set on the token cookies.
    pub cookie_domain: String,
    /// Whether the token cookies carry the `Secure` flag.
    pub cookie_secure: bool,
    /// Whether the client IP recorded on a session may come from
    /// `X-Forwarded-For`. Only enable behind a proxy that sets it.
    pub trust_forwarded_for: bool,
    /// Origins allowed by the CORS layer.
    pub cors_allowed_origins: Vec<String>,
    /// Throttling for credential endpoints; `None` disables it.
    pub auth_rate_limit: Option<AuthRateLimit>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let token_key = token_key_from_env()?;

        let (access_token_ttl, refresh_token_ttl) = token_ttls(
            parse_var("ACCESS_TOKEN_EXPIRY_HOURS", "24")?,
            parse_var("REFRESH_TOKEN_EXPIRY_HOURS", "168")?,
        )?;

        let per_second: u64 = parse_var("AUTH_RATE_LIMIT_PER_SECOND", "2")?;
        let burst_size: u32 = parse_var("AUTH_RATE_LIMIT_BURST", "10")?;
        let auth_rate_limit = (per_second > 0 && burst_size > 0).then_some(AuthRateLimit {
            per_second,
            burst_size,
        });

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            database_pool_size: parse_var("DATABASE_POOL_SIZE", "16")?,
            http_addr: parse_var("HTTP_SERVER_ADDRESS", "127.0.0.1:8080")?,
            token_key,
            access_token_ttl,
            refresh_token_ttl,
            rotate_refresh_tokens: parse_var("ROTATE_REFRESH_TOKENS", "false")?,
            cookie_domain: env::var("COOKIE_DOMAIN")
                .unwrap_or_else(|_| "localhost".to_string()),
            cookie_secure: parse_var("COOKIE_SECURE", "false")?,
            trust_forwarded_for: parse_var("TRUST_FORWARDED_FOR", "false")?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            auth_rate_limit,
        })
    }
}

/// Converts the configured hour counts into token lifetimes.
fn token_ttls(access_hours: i64, refresh_hours: i64) -> Result<(Duration, Duration)> {
    let access = ttl_from_hours("ACCESS_TOKEN_EXPIRY_HOURS", access_hours)?;
    let refresh = ttl_from_hours("REFRESH_TOKEN_EXPIRY_HOURS", refresh_hours)?;

    if refresh < access {
        anyhow::bail!("REFRESH_TOKEN_EXPIRY_HOURS must be >= ACCESS_TOKEN_EXPIRY_HOURS");
    }
    Ok((access, refresh))
}

fn ttl_from_hours(name: &str, hours: i64) -> Result<Duration> {
    if hours <= 0 {
        anyhow::bail!("{} must be positive", name);
    }

    let ttl = Duration::try_hours(hours)
        .with_context(|| format!("{} is out of range", name))?;
    // A token issued now must have a representable expiry.
    Utc::now()
        .checked_add_signed(ttl)
        .with_context(|| format!("{} is out of range", name))?;

    Ok(ttl)
}

fn token_key_from_env() -> Result<SecureKey> {
    let mut key_hex = env::var("TOKEN_SECRET_KEY")
        .context("TOKEN_SECRET_KEY must be set (generate with: openssl rand -hex 32)")?;

    let decoded = hex::decode(key_hex.trim());
    key_hex.zeroize();
    let mut key_bytes = decoded.context("TOKEN_SECRET_KEY must be valid hexadecimal")?;

    let key: Result<[u8; KEY_SIZE]> = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("TOKEN_SECRET_KEY must be exactly 32 bytes (64 hex characters)"));
    key_bytes.zeroize();

    Ok(SecureKey::new(key?))
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}", name))
}
