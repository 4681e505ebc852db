//! `zPerm` Server - Main Entry Point
//!
//! Administrative back end for the permissions store.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use zperm_server::admin::BulkAdministrator;
use zperm_server::messaging::{LogMessenger, Messenger, RedisMessenger};
use zperm_server::storage::memory::MemoryTransactionStrategy;
use zperm_server::storage::postgres::pg_storage;
use zperm_server::storage::{Storage, TransactionStrategy};
use zperm_server::{api, config, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zperm_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting zPerm Server");

    // Initialize Redis (optional - admin messages are only logged without it)
    let messenger: Arc<dyn Messenger> = match &config.redis_url {
        Some(url) => Arc::new(RedisMessenger::new(db::create_redis_client(url).await?)),
        None => {
            warn!("REDIS_URL not set. Admin messages will only be logged.");
            Arc::new(LogMessenger)
        }
    };

    // Initialize storage
    match config.database_url.clone() {
        Some(url) => {
            let pool = db::create_pool(&url).await?;
            db::run_migrations(&pool).await?;
            let storage = pg_storage(pool, config.transaction_max_attempts);
            serve(storage, messenger, config).await
        }
        None => {
            warn!("DATABASE_URL not set. Using the in-memory store; nothing will persist.");
            let storage = Storage::with_attempts(
                MemoryTransactionStrategy::new(),
                config.transaction_max_attempts,
            );
            serve(storage, messenger, config).await
        }
    }
}

async fn serve<T: TransactionStrategy + 'static>(
    storage: Storage<T>,
    messenger: Arc<dyn Messenger>,
    config: config::Config,
) -> Result<()> {
    let admin = BulkAdministrator::new(storage, messenger, config.admin_settings());
    let bind_address = config.bind_address.clone();

    // Build router
    let app = api::create_router(api::AppState::new(admin, config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
