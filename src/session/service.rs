use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    token::TokenCodec,
    types::{LoginOutcome, LoginRequest, RefreshRequest, RegisterRequest, TokenPair},
};
use crate::{
    credentials::CredentialVerifier,
    shared::AppError,
    user::{RefreshTokenUpdate, UserModel, UserRepository, UserResponse},
};

/// Register, login, logout and refresh with single-use rotating refresh tokens.
///
/// A refresh token is only accepted if it verifies and is still listed on its
/// owner's record. A verified but unlisted token revokes every session of
/// that owner before the call fails.
pub struct SessionService {
    repository: Arc<dyn UserRepository + Send + Sync>,
    verifier: Arc<dyn CredentialVerifier>,
    token_codec: TokenCodec,
}

impl SessionService {
    pub fn new(
        repository: Arc<dyn UserRepository + Send + Sync>,
        verifier: Arc<dyn CredentialVerifier>,
        token_codec: TokenCodec,
    ) -> Self {
        Self {
            repository,
            verifier,
            token_codec,
        }
    }

    pub fn token_codec(&self) -> &TokenCodec {
        &self.token_codec
    }

    /// Creates a user with a hashed password and no active sessions
    #[instrument(skip(self, request))]
    pub async fn register(&self, request: RegisterRequest) -> Result<UserResponse, AppError> {
        let name = require_non_empty(request.name, "name")?;
        let email = require_non_empty(request.email, "email")?;
        let password = request.password.ok_or(AppError::MissingField("password"))?;

        info!(email = %email, "Registering user");

        let password_hash = self.hash_password(password).await?;
        let user = UserModel::new(name, email, password_hash, request.extra);
        self.repository.create_user(&user).await?;

        info!(user_id = %user.id, "User registered");
        Ok(user.into())
    }

    /// Verifies credentials and opens a new session
    #[instrument(skip(self, request))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome, AppError> {
        let email = require_non_empty(request.email, "email")?;
        let password = request.password.ok_or(AppError::MissingField("password"))?;

        let Some(user) = self.repository.find_by_email(&email).await? else {
            warn!("Login for unknown email");
            return Err(AppError::InvalidCredentials);
        };

        if !self
            .verify_password(password, user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user.id, "Login with wrong password");
            return Err(AppError::InvalidCredentials);
        }

        let tokens = self.token_codec.issue_pair(&user.id)?;
        match self
            .repository
            .push_refresh_token(&user.id, &tokens.refresh_token)
            .await?
        {
            RefreshTokenUpdate::UserNotFound => {
                return Err(AppError::IdentityNotFound(user.id.clone()))
            }
            RefreshTokenUpdate::Applied | RefreshTokenUpdate::TokenNotListed => {}
        }

        info!(user_id = %user.id, "User logged in");
        Ok(LoginOutcome {
            user: user.into(),
            tokens,
        })
    }

    /// Ends the session belonging to the given refresh token.
    ///
    /// A second logout with the same token fails with `InvalidRefreshToken`
    /// (and revokes the remaining sessions).
    #[instrument(skip(self, request))]
    pub async fn logout(&self, request: RefreshRequest) -> Result<(), AppError> {
        let token = require_token(request.refresh_token.as_deref())?;
        let user = self.validate_refresh_token(token).await?;

        let update = self.repository.remove_refresh_token(&user.id, token).await?;
        self.settle_token_update(&user.id, update).await?;

        info!(user_id = %user.id, "User logged out");
        Ok(())
    }

    /// Exchanges a refresh token for a new pair. The old refresh token is consumed.
    #[instrument(skip(self, request))]
    pub async fn refresh(&self, request: RefreshRequest) -> Result<TokenPair, AppError> {
        let token = require_token(request.refresh_token.as_deref())?;
        let user = self.validate_refresh_token(token).await?;

        let tokens = self.token_codec.issue_pair(&user.id)?;
        let update = self
            .repository
            .rotate_refresh_token(&user.id, token, &tokens.refresh_token)
            .await?;
        self.settle_token_update(&user.id, update).await?;

        info!(user_id = %user.id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Verifies the token and checks it is still listed on its owner's record.
    /// An unlisted token revokes all of the owner's sessions, then fails.
    #[instrument(skip(self, token))]
    pub async fn validate_refresh_token(&self, token: &str) -> Result<UserModel, AppError> {
        let token = require_token(Some(token))?;
        let claims = self.token_codec.verify(token)?;

        let user = self
            .repository
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "Refresh token names an unknown user");
                AppError::IdentityNotFound(claims.sub.clone())
            })?;

        if !user.has_refresh_token(token) {
            warn!(user_id = %user.id, "Unlisted refresh token presented");
            return Err(self.revoke_all_sessions(&user.id).await);
        }

        Ok(user)
    }

    /// Maps the result of an atomic token update. Losing a race to another
    /// request on the same token is handled like any other replay.
    async fn settle_token_update(
        &self,
        user_id: &str,
        update: RefreshTokenUpdate,
    ) -> Result<(), AppError> {
        match update {
            RefreshTokenUpdate::Applied => Ok(()),
            RefreshTokenUpdate::UserNotFound => Err(AppError::IdentityNotFound(user_id.to_string())),
            RefreshTokenUpdate::TokenNotListed => {
                warn!(user_id = %user_id, "Refresh token consumed concurrently");
                Err(self.revoke_all_sessions(user_id).await)
            }
        }
    }

    /// Clears every refresh token of the user and returns the error to surface.
    /// A store failure during the wipe is surfaced instead.
    async fn revoke_all_sessions(&self, user_id: &str) -> AppError {
        match self.repository.clear_refresh_tokens(user_id).await {
            Ok(RefreshTokenUpdate::UserNotFound) => AppError::IdentityNotFound(user_id.to_string()),
            Ok(_) => {
                warn!(user_id = %user_id, "Revoked all sessions");
                AppError::InvalidRefreshToken
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to revoke sessions");
                e
            }
        }
    }

    async fn hash_password(&self, password: String) -> Result<String, AppError> {
        let verifier = Arc::clone(&self.verifier);
        tokio::task::spawn_blocking(move || verifier.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))?
    }

    async fn verify_password(&self, password: String, hash: String) -> Result<bool, AppError> {
        let verifier = Arc::clone(&self.verifier);
        tokio::task::spawn_blocking(move || verifier.verify(&password, &hash))
            .await
            .map_err(|e| AppError::Internal(format!("verification task failed: {e}")))?
    }
}

/// Returns the trimmed value; blank counts as missing
fn require_non_empty(value: Option<String>, field: &'static str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(AppError::MissingField(field))
}

fn require_token(token: Option<&str>) -> Result<&str, AppError> {
    token
        .filter(|t| !t.is_empty())
        .ok_or(AppError::MissingField("refreshToken"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::shared::test_utils::{cheap_verifier, test_auth_config};
    use crate::user::InMemoryUserRepository;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    /// Store where every conditional token update finds its token already
    /// consumed, as if another request got there first
    struct ConsumedElsewhereRepository {
        inner: Arc<InMemoryUserRepository>,
    }

    #[async_trait]
    impl UserRepository for ConsumedElsewhereRepository {
        async fn create_user(&self, user: &UserModel) -> Result<(), AppError> {
            self.inner.create_user(user).await
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, AppError> {
            self.inner.find_by_email(email).await
        }
        async fn find_by_id(&self, user_id: &str) -> Result<Option<UserModel>, AppError> {
            self.inner.find_by_id(user_id).await
        }
        async fn save_user(&self, user: &UserModel) -> Result<(), AppError> {
            self.inner.save_user(user).await
        }
        async fn push_refresh_token(
            &self,
            user_id: &str,
            token: &str,
        ) -> Result<RefreshTokenUpdate, AppError> {
            self.inner.push_refresh_token(user_id, token).await
        }
        async fn remove_refresh_token(
            &self,
            _user_id: &str,
            _token: &str,
        ) -> Result<RefreshTokenUpdate, AppError> {
            Ok(RefreshTokenUpdate::TokenNotListed)
        }
        async fn clear_refresh_tokens(
            &self,
            user_id: &str,
        ) -> Result<RefreshTokenUpdate, AppError> {
            self.inner.clear_refresh_tokens(user_id).await
        }
        async fn rotate_refresh_token(
            &self,
            _user_id: &str,
            _old_token: &str,
            _new_token: &str,
        ) -> Result<RefreshTokenUpdate, AppError> {
            Ok(RefreshTokenUpdate::TokenNotListed)
        }
    }

    fn service_losing_every_race() -> (SessionService, Arc<InMemoryUserRepository>) {
        let inner = Arc::new(InMemoryUserRepository::new());
        let repo = Arc::new(ConsumedElsewhereRepository {
            inner: inner.clone(),
        });
        let service = SessionService::new(
            repo,
            cheap_verifier(),
            TokenCodec::new(&test_auth_config()),
        );
        (service, inner)
    }

    fn service_with_repo() -> (SessionService, Arc<InMemoryUserRepository>) {
        let repo = Arc::new(InMemoryUserRepository::new());
        let service = SessionService::new(
            repo.clone(),
            cheap_verifier(),
            TokenCodec::new(&test_auth_config()),
        );
        (service, repo)
    }

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some("Ada".to_string()),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            extra: Map::new(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: Some(email.to_string()),
            password: Some(password.to_string()),
        }
    }

    fn refresh_request(token: &str) -> RefreshRequest {
        RefreshRequest {
            refresh_token: Some(token.to_string()),
        }
    }

    async fn registered_and_logged_in(service: &SessionService) -> LoginOutcome {
        service
            .register(register_request("ada@example.com", "hunter22"))
            .await
            .unwrap();
        service
            .login(login_request("ada@example.com", "hunter22"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_hashes_password() {
        let (service, repo) = service_with_repo();
        let user = service
            .register(register_request("ada@example.com", "hunter22"))
            .await
            .unwrap();

        let stored = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "hunter22");
        assert!(stored.password_hash.starts_with("$argon2id$"));
        assert!(stored.refresh_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_register_keeps_extra_fields() {
        let (service, _) = service_with_repo();
        let mut request = register_request("ada@example.com", "pw");
        request.extra.insert("avatar".to_string(), json!("ada.png"));

        let user = service.register(request).await.unwrap();
        assert_eq!(user.profile["avatar"], json!("ada.png"));
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let (service, _) = service_with_repo();

        let mut no_name = register_request("ada@example.com", "pw");
        no_name.name = None;
        assert!(matches!(
            service.register(no_name).await,
            Err(AppError::MissingField("name"))
        ));

        let mut blank_email = register_request("ada@example.com", "pw");
        blank_email.email = Some("  ".to_string());
        assert!(matches!(
            service.register(blank_email).await,
            Err(AppError::MissingField("email"))
        ));

        let mut no_password = register_request("ada@example.com", "pw");
        no_password.password = None;
        assert!(matches!(
            service.register(no_password).await,
            Err(AppError::MissingField("password"))
        ));
    }

    #[tokio::test]
    async fn test_login_appends_refresh_token() {
        let (service, repo) = service_with_repo();
        let outcome = registered_and_logged_in(&service).await;

        assert_eq!(
            repo.refresh_tokens_of(&outcome.user.id),
            vec![outcome.tokens.refresh_token.clone()]
        );
        assert_ne!(outcome.tokens.access_token, outcome.tokens.refresh_token);
    }

    #[tokio::test]
    async fn test_login_errors_do_not_reveal_account_existence() {
        let (service, _) = service_with_repo();
        registered_and_logged_in(&service).await;

        let wrong_password = service
            .login(login_request("ada@example.com", "wrong"))
            .await
            .unwrap_err();
        let unknown_email = service
            .login(login_request("nobody@example.com", "hunter22"))
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AppError::InvalidCredentials));
        assert!(matches!(unknown_email, AppError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let (service, repo) = service_with_repo();
        let outcome = registered_and_logged_in(&service).await;
        let old = outcome.tokens.refresh_token;

        let pair = service.refresh(refresh_request(&old)).await.unwrap();
        assert_ne!(pair.refresh_token, old);
        assert_eq!(
            repo.refresh_tokens_of(&outcome.user.id),
            vec![pair.refresh_token]
        );
    }

    #[tokio::test]
    async fn test_unlisted_token_revokes_everything() {
        let (service, repo) = service_with_repo();
        let outcome = registered_and_logged_in(&service).await;
        let second = service
            .login(login_request("ada@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(repo.refresh_tokens_of(&outcome.user.id).len(), 2);

        // Valid signature, never stored
        let forged = service
            .token_codec()
            .issue(&outcome.user.id, 3600)
            .unwrap();
        let result = service.validate_refresh_token(&forged).await;

        assert!(matches!(result, Err(AppError::InvalidRefreshToken)));
        assert!(repo.refresh_tokens_of(&outcome.user.id).is_empty());
        assert!(matches!(
            service.refresh(refresh_request(&second.tokens.refresh_token)).await,
            Err(AppError::InvalidRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_invalid_token_does_not_touch_store() {
        let (service, repo) = service_with_repo();
        let outcome = registered_and_logged_in(&service).await;

        let result = service.refresh(refresh_request("garbage")).await;
        assert!(matches!(result, Err(AppError::InvalidToken(_))));
        assert_eq!(repo.refresh_tokens_of(&outcome.user.id).len(), 1);
    }

    #[tokio::test]
    async fn test_token_for_unknown_user() {
        let (service, _) = service_with_repo();
        let token = service.token_codec().issue("ghost", 3600).unwrap();

        let result = service.logout(refresh_request(&token)).await;
        assert!(matches!(result, Err(AppError::IdentityNotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_refresh_token() {
        let (service, _) = service_with_repo();
        assert!(matches!(
            service.refresh(RefreshRequest::default()).await,
            Err(AppError::MissingField(_))
        ));
        assert!(matches!(
            service.logout(refresh_request("")).await,
            Err(AppError::MissingField(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_signing_key_is_configuration_error() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let service = SessionService::new(
            repo,
            cheap_verifier(),
            TokenCodec::new(&AuthConfig::new(None, 60, 120)),
        );
        service
            .register(register_request("ada@example.com", "pw"))
            .await
            .unwrap();

        let result = service.login(login_request("ada@example.com", "pw")).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_single_winner() {
        let (service, repo) = service_with_repo();
        let outcome = registered_and_logged_in(&service).await;
        let service = Arc::new(service);
        let token = outcome.tokens.refresh_token.clone();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = service.clone();
                let token = token.clone();
                tokio::spawn(async move { service.refresh(refresh_request(&token)).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        // Exactly one rotation succeeds; every loser wipes the session set
        assert_eq!(winners, 1);
        assert!(repo.refresh_tokens_of(&outcome.user.id).is_empty());
    }

    #[tokio::test]
    async fn test_refresh_losing_race_revokes_all_sessions() {
        let (service, inner) = service_losing_every_race();
        let outcome = registered_and_logged_in(&service).await;
        service
            .login(login_request("ada@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(inner.refresh_tokens_of(&outcome.user.id).len(), 2);

        let result = service
            .refresh(refresh_request(&outcome.tokens.refresh_token))
            .await;

        assert!(matches!(result, Err(AppError::InvalidRefreshToken)));
        assert!(inner.refresh_tokens_of(&outcome.user.id).is_empty());
    }

    #[tokio::test]
    async fn test_logout_losing_race_revokes_all_sessions() {
        let (service, inner) = service_losing_every_race();
        let outcome = registered_and_logged_in(&service).await;

        let result = service
            .logout(refresh_request(&outcome.tokens.refresh_token))
            .await;

        assert!(matches!(result, Err(AppError::InvalidRefreshToken)));
        assert!(inner.refresh_tokens_of(&outcome.user.id).is_empty());
    }

    #[tokio::test]
    async fn test_email_is_trimmed_on_register_and_login() {
        let (service, repo) = service_with_repo();
        let user = service
            .register(register_request("  ada@example.com ", "hunter22"))
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");

        let duplicate = service
            .register(register_request("ada@example.com", "other"))
            .await;
        assert!(matches!(duplicate, Err(AppError::DuplicateIdentity(_))));
        assert_eq!(repo.user_count(), 1);

        let login = service
            .login(login_request(" ada@example.com", "hunter22"))
            .await
            .unwrap();
        assert_eq!(login.user.id, user.id);
    }
}
