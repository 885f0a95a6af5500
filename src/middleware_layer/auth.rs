use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, Request, header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::{
    crypto::token::TokenPayload,
    error::AppError,
    models::user::User,
    services::auth::AuthError,
    state::AppState,
};

/// The only authorization scheme accepted.
pub const AUTHORIZATION_TYPE_BEARER: &str = "bearer";

/// Message returned when a well-formed bearer token fails verification.
pub const INVALID_ACCESS_TOKEN: &str = "invalid or expired access token";

/// Identity resolved by [`require_auth`] for downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub payload: TokenPayload,
    pub user: User,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthContext>().cloned().ok_or_else(|| {
            tracing::error!(
                "❌ AuthContext requested on {} but require_auth did not run",
                parts.uri.path()
            );
            AppError::Internal("authorization context missing".to_string())
        })
    }
}

/// The raw bearer token from the `Authorization` header, checked for shape
/// but not verified.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_token(&parts.headers).map(BearerToken)
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
///
/// Checks run in order: header present, exactly two fields, bearer scheme.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("authorization is not provided".to_string()))?;

    let value = value.to_str().map_err(|_| {
        AppError::Unauthorized("invalid authorization header format".to_string())
    })?;

    let fields: Vec<&str> = value.split_whitespace().collect();
    let [scheme, token] = fields.as_slice() else {
        return Err(AppError::Unauthorized(
            "invalid authorization header format".to_string(),
        ));
    };

    if scheme.to_lowercase() != AUTHORIZATION_TYPE_BEARER {
        tracing::debug!("Rejected authorization scheme: {}", scheme);
        return Err(AppError::Unauthorized(
            "unsupported authorization type".to_string(),
        ));
    }

    Ok(token.to_string())
}

/// Verifies an access token and resolves its session and user.
///
/// Read-only: nothing about the session is changed.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthContext, AuthError> {
    let payload = state.codec.verify(token)?;
    tracing::debug!("🔑 Token verified, token_id: {}", payload.token_id);

    let session = state.sessions.find_by_token_id(payload.token_id).await?;
    tracing::debug!("Login session found: {}", session.id);

    let user = state.users.get_by_id(session.user_id).await?;
    tracing::debug!("✅ User authenticated: {}", user.id);

    Ok(AuthContext { payload, user })
}

/// A middleware that requires a valid bearer access token.
///
/// On success an [`AuthContext`] is stored in the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    tracing::debug!("🔐 Checking authentication...");

    let token = bearer_token(request.headers())?;

    let context = authenticate(&state, &token).await.map_err(|e| {
        match &e {
            AuthError::Store(_) | AuthError::Directory(_) => {
                tracing::error!("❌ Backend failure while authorizing request: {}", e)
            }
            _ => tracing::warn!("❌ Access token rejected: {}", e),
        }
        AppError::Unauthorized(INVALID_ACCESS_TOKEN.to_string())
    })?;

    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn message(result: Result<String, AppError>) -> String {
        match result {
            Err(AppError::Unauthorized(msg)) => msg,
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn missing_header() {
        assert_eq!(
            message(bearer_token(&HeaderMap::new())),
            "authorization is not provided"
        );
    }

    #[test]
    fn wrong_number_of_fields() {
        assert_eq!(message(bearer_token(&headers("Bearer"))), "invalid authorization header format");
        assert_eq!(
            message(bearer_token(&headers("Bearer a b"))),
            "invalid authorization header format"
        );
    }

    #[test]
    fn non_bearer_scheme() {
        assert_eq!(
            message(bearer_token(&headers("Basic dXNlcjpwYXNz"))),
            "unsupported authorization type"
        );
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("bEaReR   abc")).unwrap(), "abc");
    }

    #[tokio::test]
    async fn auth_context_extractor_fails_without_gate() {
        let (mut parts, _) = Request::builder()
            .uri("/auth/verify_access_token")
            .body(())
            .unwrap()
            .into_parts();

        let result = AuthContext::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AppError::Internal(_))));
    }
}
