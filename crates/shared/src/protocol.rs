use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, GuildId, MemberInfo, MessageId, RoleId, VoiceSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author: MemberInfo,
    /// Voice channel the author occupied when the message arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_voice_channel: Option<ChannelId>,
    pub content: String,
    #[serde(default)]
    pub role_mentions: Vec<RoleId>,
}

/// Normalized inbound event. Every variant is scoped to exactly one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GatewayEvent {
    GuildAvailable {
        guild_id: GuildId,
    },
    GuildRemoved {
        guild_id: GuildId,
    },
    VoiceStateChanged {
        guild_id: GuildId,
        member: MemberInfo,
        before: VoiceSnapshot,
        after: VoiceSnapshot,
    },
    MuteExternallyChanged {
        guild_id: GuildId,
        member: MemberInfo,
        before: bool,
        after: bool,
    },
    MessageReceived {
        guild_id: GuildId,
        message: IncomingMessage,
    },
    ReactionAdded {
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: String,
        member: MemberInfo,
    },
}

impl GatewayEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::GuildAvailable { guild_id }
            | Self::GuildRemoved { guild_id }
            | Self::VoiceStateChanged { guild_id, .. }
            | Self::MuteExternallyChanged { guild_id, .. }
            | Self::MessageReceived { guild_id, .. }
            | Self::ReactionAdded { guild_id, .. } => *guild_id,
        }
    }
}

/// Splits one raw voice state update into the events the engine consumes.
///
/// A server-mute flip without a channel change is reported separately so the
/// engine can tell membership changes from moderator actions.
pub fn voice_update_events(
    guild_id: GuildId,
    member: MemberInfo,
    before: VoiceSnapshot,
    after: VoiceSnapshot,
) -> Vec<GatewayEvent> {
    let mut events = Vec::with_capacity(2);
    if before.server_mute != after.server_mute && before.channel_id == after.channel_id {
        events.push(GatewayEvent::MuteExternallyChanged {
            guild_id,
            member: member.clone(),
            before: before.server_mute,
            after: after.server_mute,
        });
    }
    events.push(GatewayEvent::VoiceStateChanged {
        guild_id,
        member,
        before,
        after,
    });
    events
}
