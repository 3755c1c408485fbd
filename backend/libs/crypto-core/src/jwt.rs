//! Bearer token verification.
//!
//! Tokens are issued by the external identity provider; this service only
//! verifies them. A verifier is pinned to exactly one algorithm at
//! construction time (RS256 with a public key, or HS256 with a shared
//! secret), so a token signed with any other `alg` is rejected.
//!
//! ```rust,ignore
//! let verifier = JwtVerifier::from_rsa_public_pem(&pem)?;
//! let claims = verifier.verify(token)?;
//! let user_id = claims.user_id()?;
//! ```
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Clock skew tolerated when checking `exp`.
const LEEWAY_SECS: u64 = 30;

// ============================================================================
// Data Structures
// ============================================================================

/// JWT claims. Only `sub` and `exp` are required; the subject is the user id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Claims {
    pub fn new(user_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            email: None,
            username: None,
        }
    }

    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| TokenError::Invalid("subject is not a valid user id".into()))
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("invalid key material: {0}")]
    Key(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

// ============================================================================
// Verification
// ============================================================================

#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish()
    }
}

impl JwtVerifier {
    fn pinned(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.leeway = LEEWAY_SECS;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key, validation }
    }

    /// RS256 verifier from an RSA public key in PEM format.
    pub fn from_rsa_public_pem(public_key_pem: &str) -> Result<Self, TokenError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| TokenError::Key(format!("failed to parse RSA public key: {e}")))?;
        Ok(Self::pinned(key, Algorithm::RS256))
    }

    /// HS256 verifier from a shared secret.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::pinned(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.validation.algorithms[0]
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })
    }

    /// Verify and return the subject as a user id.
    pub fn verify_user_id(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify(token)?.user_id()
    }
}

// ============================================================================
// Issuance (tooling and tests; production tokens come from the identity provider)
// ============================================================================

pub fn issue_hs256(secret: &[u8], claims: &Claims) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| TokenError::Signing(e.to_string()))
}

pub fn issue_rs256(private_key_pem: &str, claims: &Claims) -> Result<String, TokenError> {
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| TokenError::Key(format!("failed to parse RSA private key: {e}")))?;
    encode(&Header::new(Algorithm::RS256), claims, &key)
        .map_err(|e| TokenError::Signing(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
