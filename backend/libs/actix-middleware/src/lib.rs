//! # Actix Middleware Library
//!
//! Shared middleware for the chat backend's actix services
//!
//! ## Modules
//! - `jwt_auth`: bearer token authentication and the `UserId` extractor
//! - `metrics`: Prometheus HTTP request metrics
//! - `request_id`: `x-request-id` propagation

pub mod jwt_auth;
pub mod metrics;
pub mod request_id;

pub use jwt_auth::{authenticate_bearer, bearer_token, AuthFailure, JwtAuthMiddleware, UserId};
pub use metrics::MetricsMiddleware;
pub use request_id::{RequestId, RequestIdValue};
