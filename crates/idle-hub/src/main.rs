//! Idle Hub - idle-timeout automations over HTTP

use idle_tracker::IdleEngine;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use virtual_devices::VirtualDevices;

mod api;
mod config;

use api::AppState;
use config::HubConfig;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "idle_hub=debug,idle_tracker=debug,virtual_devices=debug,info".into()
            }),
        )
        .init();

    tracing::info!("Starting Idle Hub");

    let config = HubConfig::from_env()?;
    tracing::info!("Using data directory {:?}", config.data_dir);

    let devices = VirtualDevices::load(&config.data_dir).await;
    let engine = Arc::new(
        IdleEngine::new(
            devices.clone(),
            devices.event_sender(),
            Some(config.data_dir.as_path()),
        )
        .await,
    );
    tracing::info!(
        "{} devices, {} automations ({} running)",
        devices.list().len(),
        engine.list().len(),
        engine.running_count()
    );

    let app = api::router(AppState {
        engine: Arc::clone(&engine),
        devices,
    });

    tracing::info!("Listening on http://{}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}
