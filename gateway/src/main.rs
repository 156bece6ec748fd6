//! Tradegate web server.
//!
//! Listens for signed commands and forwards accepted ones to the
//! configured dispatcher:
//! - RabbitMQ when `dispatch.amqp_url` / `CLOUDAMQP_URL` is set
//! - otherwise an in-process executor that only logs commands

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tradegate::dispatch::{spawn_executor, ChannelDispatcher, LogExecutor};
use tradegate::web::{bind_listener, router};
use tradegate::{AppState, Config, Dispatcher, Publisher, QueueDispatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.server.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let started_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = started_at,
        "gateway_starting"
    );

    info!(
        port = config.server.port,
        command_url = %config.server.url,
        health_check_url = %config.server.health_check,
        signing_method = %config.server.security.method,
        amqp_configured = config.dispatch.amqp_url.is_some(),
        command_queue = %config.dispatch.queue,
        "config_loaded"
    );
    config.warn_on_insecure_signing();

    let publisher = config
        .dispatch
        .amqp_url
        .clone()
        .map(|url| Publisher::new(url, config.dispatch.queue.clone()));

    let dispatcher: Arc<dyn Dispatcher> = match &publisher {
        Some(publisher) => {
            info!(queue = %publisher.queue(), "dispatcher_rabbitmq");
            Arc::new(QueueDispatcher::new(publisher.clone()))
        }
        None => {
            info!("dispatcher_in_process");
            let (dispatcher, rx) = ChannelDispatcher::new();
            spawn_executor(rx, LogExecutor);
            Arc::new(dispatcher)
        }
    };

    let state = AppState::new(
        config.server.security.clone(),
        config.credentials.clone(),
        dispatcher,
    );
    let app = router(state, &config.server);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = bind_listener(addr)
        .await
        .context("Failed to bind to address")?;

    info!(
        address = %addr,
        command_url = %format!("http://localhost:{}{}", config.server.port, config.server.url),
        "web_server_listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(publisher) = publisher {
        publisher.close().await;
    }

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
