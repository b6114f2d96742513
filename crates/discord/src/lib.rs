//! Discord adapter: a [`gateway::VoiceGateway`] over serenity's HTTP client
//! and cache, plus an event handler that feeds normalized events to the
//! engine.

mod convert;
mod handler;
mod voice_gateway;

use anyhow::{Context, Result};
use serenity::{prelude::GatewayIntents, Client};

pub use handler::DiscordHandler;
pub use voice_gateway::DiscordGateway;

pub fn intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::MESSAGE_CONTENT
}

pub async fn build_client(token: &str, handler: DiscordHandler) -> Result<Client> {
    Client::builder(token, intents())
        .event_handler(handler)
        .await
        .context("failed to build discord client")
}
