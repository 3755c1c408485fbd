use serde::{Deserialize, Serialize};

/// JSON body returned by every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short reason phrase, e.g. "Forbidden"
    pub error: String,

    /// Caller-facing message. Never carries internal detail.
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// One of the constants in [`error_types`]
    #[serde(rename = "type")]
    pub error_type: String,

    /// One of the constants in [`error_codes`]
    pub code: String,

    /// ISO 8601
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Build a response from a status code, deriving the reason phrase and type.
    pub fn from_status(status: u16, code: &str, message: &str) -> Self {
        let (error, error_type) = match status {
            400 => ("Bad Request", error_types::VALIDATION_ERROR),
            401 => ("Unauthorized", error_types::AUTHENTICATION_ERROR),
            403 => ("Forbidden", error_types::AUTHORIZATION_ERROR),
            404 => ("Not Found", error_types::NOT_FOUND_ERROR),
            409 => ("Conflict", error_types::CONFLICT_ERROR),
            503 => ("Service Unavailable", error_types::SERVICE_UNAVAILABLE_ERROR),
            _ => ("Internal Server Error", error_types::SERVER_ERROR),
        };
        Self::new(error, message, status, error_type, code)
    }
}

/// Machine-readable error codes
pub mod error_codes {
    // Authentication
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const TOKEN_MISSING: &str = "TOKEN_MISSING";
    pub const TOKEN_INVALID: &str = "TOKEN_INVALID";
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const SERVER_CONFIG_ERROR: &str = "SERVER_CONFIG_ERROR";

    // Authorization
    pub const FORBIDDEN: &str = "FORBIDDEN";

    // Messaging
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const MESSAGE_NOT_FOUND: &str = "MESSAGE_NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const DECRYPTION_ERROR: &str = "DECRYPTION_ERROR";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

/// Error categories for client-side routing
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const AUTHENTICATION_ERROR: &str = "authentication_error";
    pub const AUTHORIZATION_ERROR: &str = "authorization_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const CONFLICT_ERROR: &str = "conflict_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const SERVICE_UNAVAILABLE_ERROR: &str = "service_unavailable_error";
}
