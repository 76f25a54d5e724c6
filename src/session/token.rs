use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{distr::Alphanumeric, Rng};
use tracing::{debug, instrument};

use super::types::{TokenClaims, TokenPair};
use crate::config::AuthConfig;
use crate::shared::AppError;

const NONCE_LEN: usize = 16;

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Signs and verifies expiring HS256 tokens carrying a subject and a random nonce
#[derive(Clone)]
pub struct TokenCodec {
    keys: Option<SigningKeys>,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
}

impl TokenCodec {
    /// Builds a codec from injected config. A missing key surfaces on first use.
    pub fn new(config: &AuthConfig) -> Self {
        let keys = config.signing_key().ok().map(|secret| SigningKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        });

        Self {
            keys,
            access_ttl_seconds: config.access_token_ttl_seconds,
            refresh_ttl_seconds: config.refresh_token_ttl_seconds,
        }
    }

    fn keys(&self) -> Result<&SigningKeys, AppError> {
        self.keys
            .as_ref()
            .ok_or_else(|| AppError::Configuration("TOKEN_SECRET is not defined".to_string()))
    }

    /// Signs a token for `subject_id` expiring `ttl_seconds` from now
    #[instrument(skip(self, subject_id))]
    pub fn issue(&self, subject_id: &str, ttl_seconds: i64) -> Result<String, AppError> {
        let keys = self.keys()?;
        let now = Utc::now();
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                AppError::Configuration(format!("token TTL of {ttl_seconds}s is out of range"))
            })?;
        let exp = expires_at.timestamp().max(0) as usize;

        debug!(ttl_seconds, exp_timestamp = exp, "Creating token with expiration");

        let claims = TokenClaims {
            sub: subject_id.to_string(),
            nonce: generate_nonce(),
            iat: now.timestamp() as usize,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).map_err(|e| {
            debug!(error = %e, "Failed to encode token");
            AppError::Internal(format!("token encoding failed: {e}"))
        })
    }

    /// Issues an access/refresh pair; each token carries its own nonce
    pub fn issue_pair(&self, subject_id: &str) -> Result<TokenPair, AppError> {
        Ok(TokenPair {
            access_token: self.issue(subject_id, self.access_ttl_seconds)?,
            refresh_token: self.issue(subject_id, self.refresh_ttl_seconds)?,
        })
    }

    /// Checks signature and expiry. Never consults the store.
    #[instrument(skip(self, token))]
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AppError> {
        let keys = self.keys()?;
        debug!("Decoding and validating token");

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<TokenClaims>(token, &keys.decoding, &validation)
            .map(|data| {
                debug!(subject = %data.claims.sub, exp = data.claims.exp, "Token decoded successfully");
                data.claims
            })
            .map_err(|e| {
                debug!(error = %e, "Failed to decode token");
                AppError::InvalidToken(e.to_string())
            })
    }
}

fn generate_nonce() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}
