use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comptes::api::middleware::session::{create_session_layer, AppState};
use comptes::config::Config;
use comptes::db;
use comptes::jobs;
use comptes::services::bootstrap;
use comptes::services::lifecycle::{ArchivePolicy, LifecycleEngine};
use comptes::services::store::postgres::{PgArchiveStore, PgPrimaryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comptes=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting comptes server...");

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let primary_pool = db::create_pool(&config.database_url).await?;
    let archive_pool = db::create_pool(&config.archive_database_url).await?;
    tracing::info!("Database pools created");

    db::run_primary_migrations(&primary_pool).await?;
    db::run_archive_migrations(&archive_pool).await?;
    tracing::info!("Database migrations completed");

    let primary = Arc::new(PgPrimaryStore::new(primary_pool.clone()));
    let archive = Arc::new(PgArchiveStore::new(archive_pool));
    let policy = ArchivePolicy {
        archive_checking_accounts: config.archive_checking_accounts,
    };
    let engine = Arc::new(LifecycleEngine::new(primary.clone(), archive, policy));

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        bootstrap::ensure_admin_user(primary.as_ref(), email, password).await?;
    }

    let session_layer = create_session_layer(primary_pool, config.secure_cookies).await?;
    tracing::info!("Session layer initialized");

    let mut scheduler = jobs::start(
        engine.clone(),
        &config.scheduler_cron,
        config.scheduler_batch_size,
    )
    .await?;

    let state = AppState {
        engine,
        config: config.clone(),
    };

    let app = comptes::api::router()
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let host: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((host, config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    tracing::info!("Scheduler stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
