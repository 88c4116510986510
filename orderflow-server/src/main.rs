//! orderflow-server — asynchronous order fulfillment and refund pipeline
//!
//! Long-running service that:
//! - Accepts bulk order records and fans them out over a durable job queue
//! - Reserves, commits and releases inventory under row-level locks
//! - Settles payments against a simulated gateway and processes refunds
//! - Maintains day-level revenue KPIs and a customer leaderboard in Redis

use orderflow_server::api;
use orderflow_server::config::Config;
use orderflow_server::error::BoxError;
use orderflow_server::queue::worker::spawn_workers;
use orderflow_server::state::AppState;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderflow_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting orderflow-server (env: {})", config.environment);

    let state = AppState::new(&config).await?;

    // Queue workers
    let shutdown = CancellationToken::new();
    let worker_handles = spawn_workers(
        config.worker_count,
        state.queue.clone(),
        state.workflow.clone(),
        state.refund_engine.clone(),
        shutdown.clone(),
    );
    tracing::info!(count = config.worker_count, "Queue workers started");

    // HTTP server
    let app = api::create_router(state);
    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("orderflow-server HTTP listening on {http_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain workers: each finishes its in-flight job before exiting
    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    tracing::info!("orderflow-server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => tracing::error!("Failed to install SIGTERM handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
