use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::middleware::error_handling;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_handling::into_response(self).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not a member of this conversation")]
    NotAMember,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

impl AppError {
    /// Returns HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_) | AppError::InvalidParticipants(_) => 400,
            AppError::Unauthorized => 401,
            AppError::NotAMember | AppError::Forbidden => 403,
            AppError::NotFound => 404,
            AppError::RateLimited { .. } => 429,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::Database(_)
            | AppError::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_errors_map_to_403() {
        assert_eq!(AppError::NotAMember.status_code(), 403);
        assert_eq!(AppError::Forbidden.status_code(), 403);
    }

    #[test]
    fn structural_errors_map_to_400() {
        assert_eq!(
            AppError::InvalidParticipants("two members required".into()).status_code(),
            400
        );
    }
}
