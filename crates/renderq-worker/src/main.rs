//! Render worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use renderq_comfy::ComfyClient;
use renderq_queue::JobQueue;
use renderq_storage::StorageClient;
use renderq_worker::{JobExecutor, WebhookNotifier, WorkerConfig, WorkerError};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("renderq=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting renderq-worker");

    let config = WorkerConfig::from_env();
    if config.webhook_url.is_empty() {
        error!("{}", WorkerError::config_error("COMPLETE_WEBHOOK_URL not set"));
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    let queue = match JobQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    let client = match ComfyClient::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Failed to create compute client: {}", e);
            std::process::exit(1);
        }
    };

    let storage = match StorageClient::from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create storage client: {}", e);
            std::process::exit(1);
        }
    };
    let notifier = Arc::new(WebhookNotifier::new(storage, config.webhook_url.clone()));

    let executor = Arc::new(JobExecutor::new(config, queue, client, notifier));

    // Signal shutdown on ctrl-c
    let shutdown_handle = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_handle.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
