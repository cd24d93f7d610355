mod api;
mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use freightdesk_core::config::{AppConfig, LoadOptions};
use tokio::{net::TcpListener, sync::oneshot};

fn init_logging(config: &AppConfig) {
    use freightdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be live before bootstrap emits its first event.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let listener = TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        address = %address,
        "freightdesk-server listening"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, api::router(app.state)).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
    });
    let mut server_task = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server_task => {
            joined??;
            return Ok(());
        }
        signal = wait_for_shutdown() => signal?,
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "freightdesk-server draining in-flight requests"
    );
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(grace, server_task).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "graceful shutdown window elapsed with requests still in flight"
        ),
    }

    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
