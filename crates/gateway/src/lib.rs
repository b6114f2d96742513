use async_trait::async_trait;
use shared::domain::{ChannelId, GuildId, MemberId, MemberInfo, MessageId, VoiceSnapshot};

/// A member currently connected to a voice channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceOccupant {
    pub member: MemberInfo,
    pub voice: VoiceSnapshot,
}

/// Calls the engine makes against the real-time platform. Every call may be
/// slow or fail; callers decide whether a failure matters.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn set_member_mute(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        mute: bool,
    ) -> anyhow::Result<()>;
    async fn voice_occupants(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> anyhow::Result<Vec<VoiceOccupant>>;
    async fn send_message(&self, channel_id: ChannelId, content: &str)
        -> anyhow::Result<MessageId>;
    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> anyhow::Result<()>;
    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId)
        -> anyhow::Result<()>;
    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> anyhow::Result<()>;
    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        member_id: MemberId,
        emoji: &str,
    ) -> anyhow::Result<()>;
}
