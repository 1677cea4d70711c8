use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worldline_api::config::AppConfig;
use worldline_api::router::build_app_router;
use worldline_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worldline_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = AppConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, env = %config.app_env, "Loaded configuration");

    // --- Database ---
    let pool = worldline_db::create_pool(&config.db_url)
        .await
        .expect("Failed to open database");
    worldline_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    worldline_db::init_schema(&pool)
        .await
        .expect("Failed to initialize database schema");
    tracing::info!(db_url = %config.db_url, "Database ready");

    // Runner tasks do not survive restarts; stale running flags would lie to
    // clients until an explicit resume.
    sqlx::query("UPDATE world_sessions SET running = 0 WHERE running = 1")
        .execute(&pool)
        .await
        .expect("Failed to reset running flags");

    // --- Application state ---
    let host = config.host.clone();
    let port = config.port;
    let state = AppState::build(config.clone(), pool).expect("Failed to build application state");
    let runner = state.runner.clone();

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(host.parse().expect("Invalid APP_HOST address"), port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    runner.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server shuts
/// down cleanly whether stopped interactively or by a process manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
