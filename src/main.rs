use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod metrics;
mod modules;
mod routes;
mod state;
mod workers;

#[cfg(test)]
mod testing;

use config::settings::AppConfig;
use infrastructure::db::pool::{connect_to_db, run_migrations};
use infrastructure::queue::rabbitmq::RabbitMqService;
use infrastructure::storage::s3::StorageService;
use infrastructure::webhook::client::WebhookClient;
use modules::transcode::repository::PgJobStore;
use state::AppState;
use workers::ffmpeg::Transcoder;
use workers::transcoder::{WorkerContext, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,videostream=debug,tower_http=info")),
        )
        .init();

    info!("Starting videostream...");

    let config = AppConfig::new().context("invalid configuration")?;

    let db = connect_to_db(&config.database_url)
        .await
        .context("failed to connect to PostgreSQL")?;
    run_migrations(&db).await.context("failed to run migrations")?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.s3_region,
        &config.minio_access_key,
        &config.minio_secret_key,
    )
    .await;

    let queue = RabbitMqService::new(&config.rabbitmq_url, &config.queue_name)
        .await
        .context("failed to connect to RabbitMQ")?;

    let state = AppState::new(
        config.clone(),
        Arc::new(PgJobStore::new(db)),
        Arc::new(storage),
        Arc::new(queue),
    );

    let transcoder = Transcoder::new(
        config.transcode_settings(),
        config.ffmpeg_path.clone(),
        config.transcode_timeout(),
    );
    let notifier = WebhookClient::new(
        Duration::from_secs(config.webhook_timeout_secs),
        config.webhook_secret.clone(),
    )
    .context("failed to build webhook client")?;

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(WorkerContext::from_state(
        &state,
        Arc::new(transcoder),
        Arc::new(notifier),
    ));
    let workers = pool.spawn(shutdown.clone());

    let app = app::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("🚀 Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    // In-flight jobs finish before the workers return.
    shutdown.cancel();
    info!("Waiting for workers to finish in-flight jobs...");
    for handle in workers {
        if let Err(e) = handle.await {
            warn!("Worker task ended abnormally: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
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
    shutdown.cancel();
}
