use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header::HeaderMap, StatusCode},
    Error, HttpMessage, HttpResponse,
};
use crypto_core::{JwtVerifier, TokenError};
use error_types::{error_codes, ErrorResponse};
use futures::future::{ready, Ready};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// User ID extracted from JWT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

/// Why a request could not be authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// No verifier configured on the server. Reported as a server error.
    NotConfigured,
    MissingToken,
    Expired,
    Invalid,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AuthFailure::NotConfigured => "Authentication is not configured",
            AuthFailure::MissingToken => "Missing bearer token",
            AuthFailure::Expired => "Token expired",
            AuthFailure::Invalid => "Invalid token",
        };
        f.write_str(msg)
    }
}

impl AuthFailure {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthFailure::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthFailure::NotConfigured => error_codes::SERVER_CONFIG_ERROR,
            AuthFailure::MissingToken => error_codes::TOKEN_MISSING,
            AuthFailure::Expired => error_codes::TOKEN_EXPIRED,
            AuthFailure::Invalid => error_codes::TOKEN_INVALID,
        }
    }

    pub fn to_response(&self) -> HttpResponse {
        let body = ErrorResponse::from_status(
            self.status_code().as_u16(),
            self.error_code(),
            &self.to_string(),
        );
        HttpResponse::build(self.status_code()).json(body)
    }

    pub fn into_error(self) -> Error {
        let response = self.to_response();
        actix_web::error::InternalError::from_response(self, response).into()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify a bearer token and return the caller's user id.
///
/// Shared by the REST middleware and the WebSocket handshake so both entry
/// points reject the same set of tokens.
pub fn authenticate_bearer(
    verifier: Option<&JwtVerifier>,
    token: Option<&str>,
) -> Result<Uuid, AuthFailure> {
    let verifier = verifier.ok_or(AuthFailure::NotConfigured)?;
    let token = token.ok_or(AuthFailure::MissingToken)?;

    verifier.verify_user_id(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        match e {
            TokenError::Expired => AuthFailure::Expired,
            _ => AuthFailure::Invalid,
        }
    })
}

/// JWT Authentication Middleware
///
/// A missing verifier is not a startup error: every guarded request then
/// fails with 500 so a misconfigured deployment never serves anonymously.
#[derive(Clone)]
pub struct JwtAuthMiddleware {
    verifier: Option<Arc<JwtVerifier>>,
}

impl JwtAuthMiddleware {
    pub fn new(verifier: Option<Arc<JwtVerifier>>) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(JwtAuthMiddlewareService {
            service: Rc::new(service),
            verifier: self.verifier.clone(),
        }))
    }
}

pub struct JwtAuthMiddlewareService<S> {
    service: Rc<S>,
    verifier: Option<Arc<JwtVerifier>>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let verifier = self.verifier.clone();

        Box::pin(async move {
            let user_id =
                match authenticate_bearer(verifier.as_deref(), bearer_token(req.headers())) {
                    Ok(user_id) => user_id,
                    Err(failure) => {
                        if failure == AuthFailure::NotConfigured {
                            tracing::error!("JWT verifier not configured; rejecting request");
                        }
                        let response = failure.to_response();
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                };

            // Insert UserId into request extensions
            req.extensions_mut().insert(UserId(user_id));

            service
                .call(req)
                .await
                .map(ServiceResponse::map_into_left_body)
        })
    }
}

/// FromRequest implementation for UserId
impl actix_web::FromRequest for UserId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<UserId>() {
            Some(user_id) => ready(Ok(*user_id)),
            None => ready(Err(AuthFailure::MissingToken.into_error())),
        }
    }
}
