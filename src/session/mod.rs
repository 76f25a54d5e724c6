// Public API - what other modules can use
pub use handlers::{login, logout, me, refresh, register};
pub use middleware::jwt_auth;
pub use service::SessionService;
pub use token::TokenCodec;
pub use types::{LoginOutcome, LoginRequest, RefreshRequest, RegisterRequest, TokenClaims, TokenPair};

// Internal modules
mod handlers;
mod middleware;
pub mod service;
pub mod token;
pub mod types;
