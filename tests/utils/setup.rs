// Each test binary uses a different subset of these helpers
#![allow(dead_code)]

use std::sync::Arc;

use session_keeper::{
    session::{LoginRequest, RefreshRequest, RegisterRequest},
    AppState, Argon2CredentialVerifier, AuthConfig, InMemoryUserRepository, SessionService,
    TokenCodec,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub repository: Arc<InMemoryUserRepository>,
    pub service: Arc<SessionService>,
    pub codec: TokenCodec,
    pub state: AppState,
}

pub struct TestSetupBuilder {
    secret: Option<String>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            secret: Some("integration-test-key".to_string()),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
        }
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = Some(secret.to_string());
        self
    }

    pub fn without_secret(mut self) -> Self {
        self.secret = None;
        self
    }

    pub fn build(self) -> TestSetup {
        let config = AuthConfig::new(self.secret, self.access_ttl_seconds, self.refresh_ttl_seconds);
        let codec = TokenCodec::new(&config);
        let repository = Arc::new(InMemoryUserRepository::new());
        let verifier = Arc::new(
            Argon2CredentialVerifier::with_costs(8, 1).expect("minimal argon2 params are valid"),
        );
        let service = Arc::new(SessionService::new(
            repository.clone(),
            verifier,
            codec.clone(),
        ));
        let state = AppState::new(repository.clone(), service.clone());

        TestSetup {
            repository,
            service,
            codec,
            state,
        }
    }
}

// ============================================================================
// Request helpers
// ============================================================================

pub fn register_request(name: &str, email: &str, password: &str) -> RegisterRequest {
    RegisterRequest {
        name: Some(name.to_string()),
        email: Some(email.to_string()),
        password: Some(password.to_string()),
        extra: Default::default(),
    }
}

pub fn login_request(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: Some(email.to_string()),
        password: Some(password.to_string()),
    }
}

pub fn refresh_request(token: &str) -> RefreshRequest {
    RefreshRequest {
        refresh_token: Some(token.to_string()),
    }
}
