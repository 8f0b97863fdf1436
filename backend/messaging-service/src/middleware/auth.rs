use axum::extract::State;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Pull the bearer token out of an Authorization header value.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Middleware resolving the request principal through the identity provider
/// and stashing the user id in request extensions. The core never validates
/// credentials itself.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    let token = bearer_token(req.headers()).ok_or(AppError::Unauthorized)?;

    let user_id: Uuid = state
        .identity
        .resolve(token)
        .await
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(user_id);

    Ok(next.run(req).await)
}
