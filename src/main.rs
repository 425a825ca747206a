use std::sync::Arc;

use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod alert;
mod analytics;
mod api;
mod bot;
mod camera;
mod chat;
mod config;
#[cfg(test)]
mod testutil;

use analytics::OllamaAnalyzer;
use api::AppState;
use bot::CommandRouter;
use camera::{CameraRegistry, SnapshotFetcher};
use chat::{DiscordClient, GatewayListener};
use config::Config;

const MESSAGE_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("camalert=debug".parse()?))
        .init();

    let config = Config::load()?;
    tracing::info!(
        cameras = config.camera_endpoints.len(),
        groups = config.bot.groups.len(),
        "loaded config"
    );

    let registry = Arc::new(CameraRegistry::from_config(&config));
    let fetcher = SnapshotFetcher::new(Arc::clone(&registry), &config.camera)?;
    let analyzer = OllamaAnalyzer::new(&config.ollama_server, &config.vision)?;
    let discord = DiscordClient::new(&config.discord_token)?;

    let router = Arc::new(CommandRouter::new(
        &config,
        registry,
        Arc::new(fetcher),
        Arc::new(analyzer),
        Arc::new(discord),
    ));

    let state = AppState::new(Arc::clone(&router), &config.api_key);
    let host = config.http.host.clone();
    let port = config.http.port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = api::start_server(state, &host, port).await {
            tracing::error!("HTTP server failed: {}", e);
        }
    });

    let (tx, rx) = mpsc::channel(MESSAGE_QUEUE);
    let gateway_handle = tokio::spawn(GatewayListener::new(&config.discord_token).run(tx));
    let dispatch_handle = tokio::spawn(bot::dispatch_messages(router, rx));

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                tracing::error!("HTTP server task failed: {}", e);
            }
        }
        result = dispatch_handle => {
            if let Err(e) = result {
                tracing::error!("message dispatch task failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    gateway_handle.abort();
    tracing::info!("shutdown complete");

    Ok(())
}
