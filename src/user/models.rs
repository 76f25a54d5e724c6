use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Database model for the users table
#[derive(Debug, Clone, PartialEq)]
pub struct UserModel {
    pub id: String, // UUID v4 as string, immutable
    pub name: String,
    pub email: String,               // Unique across users
    pub password_hash: String,       // Empty means no password set
    pub refresh_tokens: Vec<String>, // Currently valid refresh tokens, one per device
    pub profile: Map<String, Value>, // Extra registration fields
    pub created_at: DateTime<Utc>,
}

impl UserModel {
    /// Creates a user with a fresh ID and no active sessions
    pub fn new(
        name: String,
        email: String,
        password_hash: String,
        profile: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            password_hash,
            refresh_tokens: Vec::new(),
            profile,
            created_at: Utc::now(),
        }
    }

    pub fn has_refresh_token(&self, token: &str) -> bool {
        self.refresh_tokens.iter().any(|t| t == token)
    }
}

/// Public view of a user. Never carries the hash or the token list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub profile: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl From<UserModel> for UserResponse {
    fn from(user: UserModel) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            profile: user.profile,
            created_at: user.created_at,
        }
    }
}
