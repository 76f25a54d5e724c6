use session_keeper::{
    config::ServerConfig,
    credentials::Argon2CredentialVerifier,
    router,
    user::{InMemoryUserRepository, PostgresUserRepository, UserRepository},
    AppState, SessionService, TokenCodec,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_keeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting session-keeper");

    let config = ServerConfig::from_env();

    // Fail fast rather than on the first login
    if let Err(e) = config.auth.signing_key() {
        error!(error = %e, "Refusing to start");
        std::process::exit(1);
    }

    let user_repository: Arc<dyn UserRepository + Send + Sync> = match &config.database_url {
        Some(database_url) => match sqlx::PgPool::connect(database_url).await {
            Ok(pool) => {
                info!("Using PostgreSQL user store");
                Arc::new(PostgresUserRepository::new(pool))
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to database");
                std::process::exit(1);
            }
        },
        None => {
            info!("DATABASE_URL not set, using in-memory user store");
            Arc::new(InMemoryUserRepository::new())
        }
    };

    let session_service = SessionService::new(
        user_repository.clone(),
        Arc::new(Argon2CredentialVerifier::new()),
        TokenCodec::new(&config.auth),
    );
    let app_state = AppState::new(user_repository, Arc::new(session_service));
    let app = router(app_state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %config.bind_addr, "Failed to bind");
            std::process::exit(1);
        }
    };
    info!("Server running on http://{}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Server error");
    }
}
