use crate::error::AppError;
use actix_web::{http::StatusCode, HttpResponse};
use error_types::{error_codes, ErrorResponse};

/// Map a domain error to its status code and public body.
///
/// Server-side failures are logged with full detail here and reach the
/// caller only as a generic message.
pub fn map_error(err: &AppError) -> (StatusCode, ErrorResponse) {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let code = error_code(err);
    let message = if err.is_client_error() {
        err.to_string()
    } else {
        tracing::error!(error = %err, code, "request failed");
        public_message(err).to_string()
    };

    (
        status,
        ErrorResponse::from_status(status.as_u16(), code, &message),
    )
}

pub fn error_code(err: &AppError) -> &'static str {
    match err {
        AppError::Validation(_) => error_codes::VALIDATION_ERROR,
        AppError::Unauthorized => error_codes::UNAUTHORIZED,
        AppError::Forbidden => error_codes::FORBIDDEN,
        AppError::NotFound("conversation") => error_codes::CONVERSATION_NOT_FOUND,
        AppError::NotFound("message") => error_codes::MESSAGE_NOT_FOUND,
        AppError::NotFound(_) => error_codes::NOT_FOUND,
        AppError::ServerConfig(_) => error_codes::SERVER_CONFIG_ERROR,
        AppError::Decryption(_) => error_codes::DECRYPTION_ERROR,
        AppError::Database(_) => error_codes::DATABASE_ERROR,
        AppError::Config(_) | AppError::StartServer(_) | AppError::Internal(_) => {
            error_codes::INTERNAL_ERROR
        }
    }
}

fn public_message(err: &AppError) -> &'static str {
    match err {
        AppError::ServerConfig(_) => "Server is not configured to handle this request",
        AppError::Decryption(_) => "Message could not be decrypted",
        _ => "Internal server error",
    }
}

/// `(code, message)` pair for socket `error` events; same redaction as REST.
pub fn public_error(err: &AppError) -> (&'static str, String) {
    let (_, body) = map_error(err);
    (error_code(err), body.message)
}

pub fn into_response(err: &AppError) -> HttpResponse {
    let (status, response) = map_error(err);
    HttpResponse::build(status).json(response)
}
