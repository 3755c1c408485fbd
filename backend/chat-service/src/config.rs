use crate::error::AppError;
use crypto_core::JwtVerifier;
use dotenvy::dotenv;
use std::env;
use std::fmt;

/// Where bearer-token verification keys come from.
#[derive(Clone, PartialEq, Eq)]
pub enum JwtKeySource {
    /// RS256 public key, PEM encoded.
    RsaPublicPem(String),
    /// HS256 shared secret.
    Secret(String),
}

impl fmt::Debug for JwtKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RsaPublicPem(_) => f.write_str("RsaPublicPem(..)"),
            Self::Secret(_) => f.write_str("Secret([REDACTED])"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Unset runs on the in-memory store.
    pub database_url: Option<String>,
    /// Unset keeps presence process-local.
    pub redis_url: Option<String>,
    /// Unset makes every send fail with a server configuration error.
    pub encryption_secret: Option<String>,
    /// Unset makes every guarded endpoint answer 500.
    pub jwt: Option<JwtKeySource>,
    pub notification_webhook_url: Option<String>,
    /// Empty allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("encryption_secret", &self.encryption_secret.as_ref().map(|_| "[REDACTED]"))
            .field("jwt", &self.jwt)
            .field("notification_webhook_url", &self.notification_webhook_url)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            redis_url: None,
            encryption_secret: None,
            jwt: None,
            notification_webhook_url: None,
            cors_allowed_origins: Vec::new(),
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::Config(format!("PORT is not a valid port: {raw}")))?,
            None => defaults.port,
        };

        let jwt = if let Some(pem) = get("JWT_PUBLIC_KEY_PEM") {
            Some(JwtKeySource::RsaPublicPem(pem))
        } else if let Some(path) = get("JWT_PUBLIC_KEY_FILE") {
            let pem = std::fs::read_to_string(&path)
                .map_err(|e| AppError::Config(format!("JWT_PUBLIC_KEY_FILE {path}: {e}")))?;
            Some(JwtKeySource::RsaPublicPem(pem))
        } else {
            get("JWT_SECRET").map(JwtKeySource::Secret)
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            encryption_secret: get("ENCRYPTION_SECRET"),
            jwt,
            notification_webhook_url: get("NOTIFICATION_WEBHOOK_URL"),
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `None` when no key is configured; guarded routes then refuse with 500.
    pub fn jwt_verifier(&self) -> Result<Option<JwtVerifier>, AppError> {
        match &self.jwt {
            Some(JwtKeySource::RsaPublicPem(pem)) => JwtVerifier::from_rsa_public_pem(pem)
                .map(Some)
                .map_err(|e| AppError::Config(format!("JWT public key: {e}"))),
            Some(JwtKeySource::Secret(secret)) => {
                Ok(Some(JwtVerifier::from_secret(secret.as_bytes())))
            }
            None => Ok(None),
        }
    }
}
