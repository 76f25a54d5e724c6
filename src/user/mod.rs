pub mod models;
pub mod repository;

pub use models::{UserModel, UserResponse};
pub use repository::{
    InMemoryUserRepository, PostgresUserRepository, RefreshTokenUpdate, UserRepository,
};
