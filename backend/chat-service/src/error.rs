use crate::middleware::error_handling;
use crate::store::StoreError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use crypto_core::EnvelopeError;
use thiserror::Error;

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        error_handling::into_response(self)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("unauthorized")]
    Unauthorized,

    /// A required server-side secret (token key, encryption secret) is absent.
    #[error("server configuration error: {0}")]
    ServerConfig(String),

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<EnvelopeError> for AppError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::MissingSecret => AppError::ServerConfig(e.to_string()),
            EnvelopeError::MalformedEnvelope | EnvelopeError::AuthenticationFailed => {
                AppError::Decryption(e.to_string())
            }
            EnvelopeError::Encryption => AppError::Internal(e.to_string()),
        }
    }
}

impl AppError {
    pub fn conversation_not_found() -> Self {
        AppError::NotFound("conversation")
    }

    pub fn message_not_found() -> Self {
        AppError::NotFound("message")
    }

    /// Returns HTTP status code
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthorized => 401,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::Config(_)
            | AppError::StartServer(_)
            | AppError::ServerConfig(_)
            | AppError::Decryption(_)
            | AppError::Database(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// Whether the caller may see this error's own message.
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }
}
