use async_trait::async_trait;
use sqlx::{types::Json, PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::models::UserModel;
use crate::shared::AppError;

const UNIQUE_VIOLATION: &str = "23505";

/// Result of an atomic change to a user's refresh-token list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTokenUpdate {
    /// The change was applied
    Applied,
    /// The token the change depends on is not in the list
    TokenNotListed,
    /// No user with that ID
    UserNotFound,
}

/// Trait for user record storage. Emails are unique.
#[async_trait]
pub trait UserRepository {
    async fn create_user(&self, user: &UserModel) -> Result<(), AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError>;
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserModel>, AppError>;

    /// Overwrites the stored record (last writer wins)
    async fn save_user(&self, user: &UserModel) -> Result<(), AppError>;

    /// Atomically appends a refresh token
    async fn push_refresh_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<RefreshTokenUpdate, AppError>;

    /// Atomically removes a refresh token if it is listed
    async fn remove_refresh_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<RefreshTokenUpdate, AppError>;

    /// Atomically empties the refresh-token list, leaving the rest of the record alone
    async fn clear_refresh_tokens(&self, user_id: &str) -> Result<RefreshTokenUpdate, AppError>;

    /// Atomically replaces `old_token` with `new_token`, only if `old_token` is listed.
    /// Two concurrent rotations of the same token cannot both succeed.
    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        old_token: &str,
        new_token: &str,
    ) -> Result<RefreshTokenUpdate, AppError>;
}

/// In-memory implementation of UserRepository for development and testing
///
/// Records live in a map keyed by user ID. Every operation holds the lock for
/// its whole read-modify-write, which makes the token mutations atomic.
pub struct InMemoryUserRepository {
    users: Mutex<HashMap<String, UserModel>>,
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUserRepository {
    /// Creates a new empty in-memory repository
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an in-memory repository with pre-populated users
    pub fn with_users(users: Vec<UserModel>) -> Self {
        let user_map = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: Mutex::new(user_map),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, UserModel>>, AppError> {
        self.users
            .lock()
            .map_err(|_| AppError::Internal("user store lock poisoned".to_string()))
    }

    /// Returns the current number of users in the repository
    pub fn user_count(&self) -> usize {
        self.lock().map(|users| users.len()).unwrap_or(0)
    }

    /// Active refresh tokens for a user (useful for assertions)
    pub fn refresh_tokens_of(&self, user_id: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|users| users.get(user_id).map(|u| u.refresh_tokens.clone()))
            .unwrap_or_default()
    }

    fn update_tokens<F>(&self, user_id: &str, apply: F) -> Result<RefreshTokenUpdate, AppError>
    where
        F: FnOnce(&mut Vec<String>) -> RefreshTokenUpdate,
    {
        let mut users = self.lock()?;
        match users.get_mut(user_id) {
            Some(user) => Ok(apply(&mut user.refresh_tokens)),
            None => Ok(RefreshTokenUpdate::UserNotFound),
        }
    }
}

fn remove_listed(tokens: &mut Vec<String>, token: &str) -> bool {
    match tokens.iter().position(|t| t == token) {
        Some(index) => {
            tokens.remove(index);
            true
        }
        None => false,
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    #[instrument(skip(self, user))]
    async fn create_user(&self, user: &UserModel) -> Result<(), AppError> {
        debug!(user_id = %user.id, email = %user.email, "Creating user in memory");

        let mut users = self.lock()?;
        if users.values().any(|u| u.email == user.email) {
            warn!(email = %user.email, "Email already registered in memory");
            return Err(AppError::DuplicateIdentity(user.email.clone()));
        }
        if users.contains_key(&user.id) {
            warn!(user_id = %user.id, "User ID already exists in memory");
            return Err(AppError::DatabaseError("User already exists".to_string()));
        }
        users.insert(user.id.clone(), user.clone());

        debug!(user_id = %user.id, "User created successfully in memory");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError> {
        debug!("Fetching user by email from memory");
        let users = self.lock()?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserModel>, AppError> {
        debug!("Fetching user by id from memory");
        let users = self.lock()?;
        Ok(users.get(user_id).cloned())
    }

    #[instrument(skip(self, user))]
    async fn save_user(&self, user: &UserModel) -> Result<(), AppError> {
        debug!(user_id = %user.id, "Saving user in memory");

        let mut users = self.lock()?;
        if !users.contains_key(&user.id) {
            warn!(user_id = %user.id, "User not found for save in memory");
            return Err(AppError::IdentityNotFound(user.id.clone()));
        }
        if users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(AppError::DuplicateIdentity(user.email.clone()));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn push_refresh_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<RefreshTokenUpdate, AppError> {
        self.update_tokens(user_id, |tokens| {
            tokens.push(token.to_string());
            RefreshTokenUpdate::Applied
        })
    }

    #[instrument(skip(self, token))]
    async fn remove_refresh_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<RefreshTokenUpdate, AppError> {
        self.update_tokens(user_id, |tokens| {
            if remove_listed(tokens, token) {
                RefreshTokenUpdate::Applied
            } else {
                RefreshTokenUpdate::TokenNotListed
            }
        })
    }

    #[instrument(skip(self))]
    async fn clear_refresh_tokens(&self, user_id: &str) -> Result<RefreshTokenUpdate, AppError> {
        self.update_tokens(user_id, |tokens| {
            tokens.clear();
            RefreshTokenUpdate::Applied
        })
    }

    #[instrument(skip(self, old_token, new_token))]
    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        old_token: &str,
        new_token: &str,
    ) -> Result<RefreshTokenUpdate, AppError> {
        self.update_tokens(user_id, |tokens| {
            if remove_listed(tokens, old_token) {
                tokens.push(new_token.to_string());
                RefreshTokenUpdate::Applied
            } else {
                RefreshTokenUpdate::TokenNotListed
            }
        })
    }
}

/// PostgreSQL implementation of user repository.
/// Refresh tokens are a `TEXT[]` column; see `migrations/`.
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> UserModel {
        let profile: Json<serde_json::Map<String, serde_json::Value>> = row.get("profile");
        UserModel {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            refresh_tokens: row.get("refresh_tokens"),
            profile: profile.0,
            created_at: row.get("created_at"),
        }
    }

    /// Runs a conditional token update; zero rows means either no user or an unlisted token
    async fn conditional_update(
        &self,
        user_id: &str,
        result: sqlx::postgres::PgQueryResult,
    ) -> Result<RefreshTokenUpdate, AppError> {
        if result.rows_affected() > 0 {
            return Ok(RefreshTokenUpdate::Applied);
        }

        let exists = sqlx::query("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .is_some();

        Ok(if exists {
            RefreshTokenUpdate::TokenNotListed
        } else {
            RefreshTokenUpdate::UserNotFound
        })
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    warn!(error = %e, "User store query failed");
    AppError::DatabaseError(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

const SELECT_USER: &str =
    "SELECT id, name, email, password_hash, refresh_tokens, profile, created_at FROM users";

#[async_trait]
impl UserRepository for PostgresUserRepository {
    #[instrument(skip(self, user))]
    async fn create_user(&self, user: &UserModel) -> Result<(), AppError> {
        debug!(user_id = %user.id, "Creating user in database");

        sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, refresh_tokens, profile, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.refresh_tokens)
        .bind(Json(&user.profile))
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                warn!(email = %user.email, "Email already registered");
                AppError::DuplicateIdentity(user.email.clone())
            } else {
                db_error(e)
            }
        })?;

        debug!(user_id = %user.id, "User created successfully in database");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError> {
        debug!("Fetching user by email from database");

        let row = sqlx::query(&format!("{SELECT_USER} WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(Self::map_row))
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserModel>, AppError> {
        debug!("Fetching user by id from database");

        let row = sqlx::query(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(Self::map_row))
    }

    #[instrument(skip(self, user))]
    async fn save_user(&self, user: &UserModel) -> Result<(), AppError> {
        debug!(user_id = %user.id, "Saving user in database");

        let result = sqlx::query(
            "UPDATE users SET name = $2, email = $3, password_hash = $4, refresh_tokens = $5, profile = $6 WHERE id = $1"
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.refresh_tokens)
        .bind(Json(&user.profile))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::DuplicateIdentity(user.email.clone())
            } else {
                db_error(e)
            }
        })?;

        if result.rows_affected() == 0 {
            warn!(user_id = %user.id, "User not found for save");
            return Err(AppError::IdentityNotFound(user.id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn push_refresh_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<RefreshTokenUpdate, AppError> {
        let result = sqlx::query(
            "UPDATE users SET refresh_tokens = array_append(refresh_tokens, $2) WHERE id = $1",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(if result.rows_affected() > 0 {
            RefreshTokenUpdate::Applied
        } else {
            RefreshTokenUpdate::UserNotFound
        })
    }

    #[instrument(skip(self, token))]
    async fn remove_refresh_token(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<RefreshTokenUpdate, AppError> {
        let result = sqlx::query(
            "UPDATE users SET refresh_tokens = array_remove(refresh_tokens, $2) WHERE id = $1 AND $2 = ANY(refresh_tokens)",
        )
        .bind(user_id)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.conditional_update(user_id, result).await
    }

    #[instrument(skip(self))]
    async fn clear_refresh_tokens(&self, user_id: &str) -> Result<RefreshTokenUpdate, AppError> {
        let result = sqlx::query("UPDATE users SET refresh_tokens = '{}' WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(if result.rows_affected() > 0 {
            RefreshTokenUpdate::Applied
        } else {
            RefreshTokenUpdate::UserNotFound
        })
    }

    #[instrument(skip(self, old_token, new_token))]
    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        old_token: &str,
        new_token: &str,
    ) -> Result<RefreshTokenUpdate, AppError> {
        let result = sqlx::query(
            "UPDATE users SET refresh_tokens = array_append(array_remove(refresh_tokens, $2), $3) WHERE id = $1 AND $2 = ANY(refresh_tokens)",
        )
        .bind(user_id)
        .bind(old_token)
        .bind(new_token)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        self.conditional_update(user_id, result).await
    }
}
