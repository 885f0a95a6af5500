use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{error::AppError, handlers, middleware_layer, state::AppState};

/// Builds the HTTP surface.
///
/// The credential routes are throttled per peer IP when a rate limit is
/// configured, which requires serving with `ConnectInfo<SocketAddr>`.
pub fn router(state: AppState) -> anyhow::Result<Router> {
    let mut credential_routes: Router<AppState> = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register));

    if let Some(limit) = state.config.auth_rate_limit {
        let governor_conf = GovernorConfigBuilder::default()
            .per_second(limit.per_second)
            .burst_size(limit.burst_size)
            .use_headers()
            .finish()
            .context("invalid AUTH_RATE_LIMIT settings")?;
        credential_routes = credential_routes.layer(GovernorLayer::new(Arc::new(governor_conf)));
    }

    let gated_routes: Router<AppState> = Router::new()
        .route("/auth/logout", delete(handlers::auth::logout))
        .route(
            "/auth/verify_access_token",
            get(handlers::auth::verify_access_token),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_auth,
        ));

    let origins = state
        .config
        .cors_allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid CORS_ALLOWED_ORIGINS entry")?;

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT, header::COOKIE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86400));

    Ok(Router::new()
        .route("/health", get(handlers::auth::health))
        .route("/auth/refresh_token", get(handlers::auth::refresh_token))
        .merge(credential_routes)
        .merge(gated_routes)
        .fallback(|| async { AppError::NotFound("route not found".to_string()) })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(cors)
        .with_state(state))
}
