use slot_swap::{api, AppState, Config, CredentialService, Database};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_logging(&config.log_level)?;

    info!("Starting Slot Swap...");
    info!("Server: {}", config.server_address());
    info!("Database: {}", config.database_url);
    info!("Token lifetime: {}s", config.token_ttl_seconds);

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database ready");

    let credentials = CredentialService::new(
        db.clone(),
        &config.jwt_secret,
        config.token_ttl_seconds,
        config.bcrypt_cost,
    );

    // Create app state
    let state = AppState::new(db, credentials);

    let addr = config.server_address();

    // Create router
    let app = api::create_router(state, config.cors_origins);

    // Start HTTP server
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_logging(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
