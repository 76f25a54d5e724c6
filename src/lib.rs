// Library crate for the session-keeper auth service
// This file exposes the public API for the binary and integration tests

pub mod config;
pub mod credentials;
pub mod routes;
pub mod session;
pub mod shared;
pub mod user;

// Re-export commonly used types for easier access in tests
pub use config::{AuthConfig, ServerConfig};
pub use credentials::{Argon2CredentialVerifier, CredentialVerifier};
pub use routes::router;
pub use session::{SessionService, TokenCodec, TokenPair};
pub use shared::{AppError, AppState};
pub use user::{InMemoryUserRepository, RefreshTokenUpdate, UserModel, UserRepository};
