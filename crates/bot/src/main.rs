use std::sync::Arc;

use anyhow::Context;
use discord::{DiscordGateway, DiscordHandler};
use engine::SessionRegistry;
use storage::JsonFileStore;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, resolve_token};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let token = resolve_token(&settings)?;
    let store = JsonFileStore::open(&settings.data_path)
        .await
        .map_err(|error| {
            error!(
                path = %settings.data_path.display(),
                %error,
                "failed to open config store; fix or remove the file before restarting"
            );
            error
        })?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut client = discord::build_client(&token, DiscordHandler::new(events_tx)).await?;

    let gateway = Arc::new(DiscordGateway::new(
        Arc::clone(&client.http),
        Arc::clone(&client.cache),
    ));
    let registry = Arc::new(SessionRegistry::new(
        gateway,
        Arc::new(store),
        settings.session_settings(),
    ));
    tokio::spawn(registry.run(events_rx));

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for shutdown signal");
            return;
        }
        info!("shutting down");
        shard_manager.shutdown_all().await;
    });

    info!(
        prefix = %settings.command_prefix,
        data_path = %settings.data_path.display(),
        "starting discord client"
    );
    client.start().await.context("discord client stopped")?;
    Ok(())
}
