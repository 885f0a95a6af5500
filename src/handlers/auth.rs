use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{StatusCode, header, request::Parts},
    response::IntoResponse,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};
use uuid::Uuid;

use crate::{
    config::Config,
    crypto::token::{IssuedToken, TokenPayload},
    error::Result,
    middleware_layer::auth::{AuthContext, BearerToken},
    models::user::UserProfile,
    services::auth::{ClientMetadata, Registration},
    state::AppState,
    validation::auth::{validate_password, validate_request, validate_username},
};

/// Cookie carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
/// Cookie carrying the refresh token.
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// The request payload for user login.
#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[garde(length(min = 1))]
    pub username: String,
    #[garde(length(min = 1))]
    pub password: String,
}

/// The request payload for user registration.
#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(custom(validate_username))]
    pub username: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 255))]
    pub name: String,
    #[garde(custom(validate_password))]
    pub password: String,
    #[garde(skip)]
    pub confirm_password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub user: UserProfile,
    pub login_session_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub access_token_expires_in: i64,
    /// Seconds until the refresh token expires.
    pub refresh_token_expires_in: i64,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub created_user_id: Uuid,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub user: UserProfile,
    pub login_session_id: i64,
    pub access_token: String,
    pub access_token_expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_in: Option<i64>,
}

#[derive(Serialize)]
pub struct VerifyAccessTokenResponse {
    pub payload: TokenPayload,
    pub user: UserProfile,
}

#[derive(Serialize)]
pub struct LogoutResponse {}

/// The address a request came from. `X-Forwarded-For` is only honoured when
/// `trust_forwarded_for` is set; otherwise the peer address is used.
fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| parts.headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty());

    forwarded
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

impl FromRequestParts<AppState> for ClientMetadata {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientMetadata {
            user_agent,
            client_ip: client_ip(parts, state.config.trust_forwarded_for),
        })
    }
}

fn seconds_left(issued: &IssuedToken) -> i64 {
    (issued.payload.expires_at - issued.payload.issued_at).num_seconds()
}

/// Creates an HttpOnly token cookie scoped to the configured domain.
fn token_cookie(
    config: &Config,
    name: &'static str,
    value: String,
    max_age_secs: i64,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_domain(config.cookie_domain.clone());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_secure(config.cookie_secure);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie
}

/// Handles user login.
pub async fn login(
    State(state): State<AppState>,
    client: ClientMetadata,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    tracing::info!("🔐 Login attempt for: {}", payload.username);
    validate_request(&payload)?;

    let outcome = state
        .auth
        .login(&payload.username, &payload.password, client)
        .await?;

    let access_expires_in = seconds_left(&outcome.access);
    let refresh_expires_in = seconds_left(&outcome.refresh);

    cookies.add(token_cookie(
        &state.config,
        ACCESS_TOKEN_COOKIE,
        outcome.access.token.clone(),
        access_expires_in,
    ));
    cookies.add(token_cookie(
        &state.config,
        REFRESH_TOKEN_COOKIE,
        outcome.refresh.token.clone(),
        refresh_expires_in,
    ));

    Ok(Json(LoginResponse {
        user: UserProfile::from(&outcome.user),
        login_session_id: outcome.session.id,
        access_token: outcome.access.token,
        refresh_token: outcome.refresh.token,
        access_token_expires_in: access_expires_in,
        refresh_token_expires_in: refresh_expires_in,
    }))
}

/// Handles user registration.
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    tracing::info!("📝 Register attempt for: {}", payload.username);
    validate_request(&payload)?;

    let user = state
        .auth
        .register(Registration {
            username: payload.username,
            email: payload.email,
            name: payload.name.trim().to_string(),
            password: payload.password,
            confirm_password: payload.confirm_password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            created_user_id: user.id,
        }),
    ))
}

/// Exchanges a bearer refresh token for a new access token.
pub async fn refresh_token(
    State(state): State<AppState>,
    cookies: Cookies,
    BearerToken(token): BearerToken,
) -> Result<Json<RefreshResponse>> {
    let outcome = state.auth.refresh(&token).await?;

    let access_expires_in = seconds_left(&outcome.access);
    cookies.add(token_cookie(
        &state.config,
        ACCESS_TOKEN_COOKIE,
        outcome.access.token.clone(),
        access_expires_in,
    ));

    let refresh_expires_in = outcome.refresh.as_ref().map(seconds_left);
    if let (Some(rotated), Some(expires_in)) = (&outcome.refresh, refresh_expires_in) {
        cookies.add(token_cookie(
            &state.config,
            REFRESH_TOKEN_COOKIE,
            rotated.token.clone(),
            expires_in,
        ));
    }

    Ok(Json(RefreshResponse {
        user: UserProfile::from(&outcome.user),
        login_session_id: outcome.session.id,
        access_token: outcome.access.token,
        access_token_expires_in: access_expires_in,
        refresh_token: outcome.refresh.map(|issued| issued.token),
        refresh_token_expires_in: refresh_expires_in,
    }))
}

/// Handles user logout. Requires [`require_auth`](crate::middleware_layer::auth::require_auth).
pub async fn logout(
    State(state): State<AppState>,
    context: AuthContext,
    cookies: Cookies,
) -> Result<Json<LogoutResponse>> {
    tracing::info!("👋 Logout for user: {}", context.user.id);

    state.auth.logout(context.payload.token_id).await?;

    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        cookies.remove(token_cookie(&state.config, name, String::new(), 0));
    }

    Ok(Json(LogoutResponse {}))
}

/// Returns the verified token payload and the user it belongs to.
pub async fn verify_access_token(context: AuthContext) -> Json<VerifyAccessTokenResponse> {
    Json(VerifyAccessTokenResponse {
        user: UserProfile::from(&context.user),
        payload: context.payload,
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(forwarded_for: Option<&str>, peer: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/auth/login");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        if let Some(addr) = peer {
            parts
                .extensions
                .insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        }
        parts
    }

    #[test]
    fn forwarded_for_is_ignored_unless_trusted() {
        let parts = parts(Some("203.0.113.9"), Some("10.1.2.3:4000"));
        assert_eq!(client_ip(&parts, false), "10.1.2.3");
        assert_eq!(client_ip(&parts, true), "203.0.113.9");
    }

    #[test]
    fn trusted_forwarded_for_uses_first_hop() {
        let parts = parts(Some("203.0.113.9, 10.0.0.1"), None);
        assert_eq!(client_ip(&parts, true), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        assert_eq!(client_ip(&parts(Some(""), Some("10.1.2.3:4000")), true), "10.1.2.3");
        assert_eq!(client_ip(&parts(Some("203.0.113.9"), None), false), "unknown");
        assert_eq!(client_ip(&parts(None, None), true), "unknown");
    }
}
