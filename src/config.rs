use tracing::warn;

use crate::shared::AppError;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
/// Upper bound for either TTL (ten years)
pub const MAX_TOKEN_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Token signing configuration, read once at startup and injected into the codec
#[derive(Clone, Debug)]
pub struct AuthConfig {
    token_secret: Option<String>,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
}

impl AuthConfig {
    pub fn new(
        token_secret: Option<String>,
        access_token_ttl_seconds: i64,
        refresh_token_ttl_seconds: i64,
    ) -> Self {
        Self {
            // An empty key is as good as none
            token_secret: token_secret.filter(|s| !s.is_empty()),
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var("TOKEN_SECRET").ok(),
            ttl_from_env("ACCESS_TOKEN_EXPIRATION", DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            ttl_from_env("REFRESH_TOKEN_EXPIRATION", DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
        )
    }

    /// Returns the signing key or a `Configuration` error when none was provided
    pub fn signing_key(&self) -> Result<&str, AppError> {
        self.token_secret
            .as_deref()
            .ok_or_else(|| AppError::Configuration("TOKEN_SECRET is not defined".to_string()))
    }
}

/// Process-level settings for the HTTP binary
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub auth: AuthConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            auth: AuthConfig::from_env(),
        }
    }
}

fn ttl_from_env(var: &str, default: i64) -> i64 {
    match std::env::var(var) {
        Ok(raw) => parse_ttl(&raw).unwrap_or_else(|| {
            warn!(variable = var, value = %raw, default, "Ignoring invalid token TTL");
            default
        }),
        Err(_) => default,
    }
}

fn parse_ttl(raw: &str) -> Option<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|seconds| (1..=MAX_TOKEN_TTL_SECONDS).contains(seconds))
}
