use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use gateway::{VoiceGateway, VoiceOccupant};
use serenity::{
    all::{Cache, Http},
    builder::{CreateMessage, EditMember, EditMessage},
    model::channel::ReactionType,
};
use shared::domain::{ChannelId, GuildId, MemberId, MessageId};
use tracing::debug;

use crate::convert::{
    channel_id, member_info, message_id, to_channel, to_guild, to_message, to_user,
    voice_snapshot,
};

/// Serenity-backed gateway. Voice occupants come from the cache, everything
/// else goes through the HTTP client.
#[derive(Clone)]
pub struct DiscordGateway {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    fn http(&self) -> &Http {
        &self.http
    }
}

#[async_trait]
impl VoiceGateway for DiscordGateway {
    async fn set_member_mute(&self, guild_id: GuildId, member_id: MemberId, mute: bool) -> Result<()> {
        to_guild(guild_id)
            .edit_member(self.http(), to_user(member_id), EditMember::new().mute(mute))
            .await
            .with_context(|| format!("failed to set mute={mute} for member {member_id}"))?;
        debug!(guild = %guild_id, member = %member_id, mute, "discord member edited");
        Ok(())
    }

    async fn voice_occupants(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
    ) -> Result<Vec<VoiceOccupant>> {
        // The cache guard must not be held across an await point.
        let guild = self
            .cache
            .guild(to_guild(guild_id))
            .ok_or_else(|| anyhow!("guild {guild_id} is not cached"))?;
        let occupants = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id.map(channel_id) == Some(channel))
            .filter_map(|state| {
                let member = guild
                    .members
                    .get(&state.user_id)
                    .or(state.member.as_ref())?;
                if member.user.bot {
                    return None;
                }
                Some(VoiceOccupant {
                    member: member_info(member),
                    voice: voice_snapshot(Some(state)),
                })
            })
            .collect();
        Ok(occupants)
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<MessageId> {
        let message = to_channel(channel)
            .send_message(self.http(), CreateMessage::new().content(content))
            .await
            .with_context(|| format!("failed to send message to channel {channel}"))?;
        Ok(message_id(message.id))
    }

    async fn edit_message(&self, channel: ChannelId, message: MessageId, content: &str) -> Result<()> {
        to_channel(channel)
            .edit_message(self.http(), to_message(message), EditMessage::new().content(content))
            .await
            .with_context(|| format!("failed to edit message {message}"))?;
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        to_channel(channel)
            .delete_message(self.http(), to_message(message))
            .await
            .with_context(|| format!("failed to delete message {message}"))
    }

    async fn add_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        to_channel(channel)
            .create_reaction(
                self.http(),
                to_message(message),
                ReactionType::Unicode(emoji.to_string()),
            )
            .await
            .with_context(|| format!("failed to react {emoji} on message {message}"))
    }

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        member_id: MemberId,
        emoji: &str,
    ) -> Result<()> {
        to_channel(channel)
            .delete_reaction(
                self.http(),
                to_message(message),
                Some(to_user(member_id)),
                ReactionType::Unicode(emoji.to_string()),
            )
            .await
            .with_context(|| format!("failed to remove {emoji} of member {member_id}"))
    }
}
