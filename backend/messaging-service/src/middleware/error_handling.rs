use crate::error::AppError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use error_types::ErrorResponse;

/// Map domain errors to HTTP responses using the shared error envelope.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (error_type, code) = match err {
        AppError::BadRequest(_) => (error_types::error_types::VALIDATION_ERROR, "INVALID_REQUEST"),
        AppError::InvalidParticipants(_) => (
            error_types::error_types::VALIDATION_ERROR,
            error_types::error_codes::INVALID_PARTICIPANTS,
        ),
        AppError::Unauthorized => (
            error_types::error_types::AUTHENTICATION_ERROR,
            error_types::error_codes::INVALID_CREDENTIALS,
        ),
        AppError::NotAMember => (
            error_types::error_types::AUTHORIZATION_ERROR,
            error_types::error_codes::NOT_CONVERSATION_MEMBER,
        ),
        AppError::Forbidden => (
            error_types::error_types::AUTHORIZATION_ERROR,
            "AUTHORIZATION_ERROR",
        ),
        AppError::NotFound => (
            error_types::error_types::NOT_FOUND_ERROR,
            error_types::error_codes::MESSAGE_NOT_FOUND,
        ),
        AppError::RateLimited { .. } => (
            error_types::error_types::RATE_LIMIT_ERROR,
            error_types::error_codes::RATE_LIMIT_ERROR,
        ),
        AppError::Database(_) => (
            error_types::error_types::SERVER_ERROR,
            error_types::error_codes::DATABASE_ERROR,
        ),
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal => (
            error_types::error_types::SERVER_ERROR,
            error_types::error_codes::INTERNAL_SERVER_ERROR,
        ),
    };

    let message = err.to_string();
    let response = ErrorResponse::new(
        match status {
            StatusCode::BAD_REQUEST => "Bad Request",
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "Not Found",
            StatusCode::TOO_MANY_REQUESTS => "Too Many Requests",
            StatusCode::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "Error",
        },
        &message,
        status.as_u16(),
        error_type,
        code,
    );

    (status, response)
}

pub fn into_response(err: AppError) -> impl IntoResponse {
    let (status, response) = map_error(&err);
    (status, Json(response))
}
