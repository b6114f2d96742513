use serenity::model::{
    channel::ReactionType,
    guild::Member,
    id as discord_id,
    voice::VoiceState,
};
use shared::domain::{ChannelId, GuildId, MemberId, MemberInfo, MessageId, RoleId, VoiceSnapshot};

pub(crate) fn guild_id(id: discord_id::GuildId) -> GuildId {
    GuildId(id.get())
}

pub(crate) fn channel_id(id: discord_id::ChannelId) -> ChannelId {
    ChannelId(id.get())
}

pub(crate) fn message_id(id: discord_id::MessageId) -> MessageId {
    MessageId(id.get())
}

pub(crate) fn member_id(id: discord_id::UserId) -> MemberId {
    MemberId(id.get())
}

pub(crate) fn role_ids(roles: &[discord_id::RoleId]) -> Vec<RoleId> {
    roles.iter().map(|role| RoleId(role.get())).collect()
}

pub(crate) fn to_guild(id: GuildId) -> discord_id::GuildId {
    discord_id::GuildId::new(id.0)
}

pub(crate) fn to_channel(id: ChannelId) -> discord_id::ChannelId {
    discord_id::ChannelId::new(id.0)
}

pub(crate) fn to_message(id: MessageId) -> discord_id::MessageId {
    discord_id::MessageId::new(id.0)
}

pub(crate) fn to_user(id: MemberId) -> discord_id::UserId {
    discord_id::UserId::new(id.0)
}

pub(crate) fn member_info(member: &Member) -> MemberInfo {
    MemberInfo::new(member_id(member.user.id), member.display_name())
        .with_roles(role_ids(&member.roles))
}

pub(crate) fn voice_snapshot(state: Option<&VoiceState>) -> VoiceSnapshot {
    state.map_or_else(VoiceSnapshot::default, |state| VoiceSnapshot {
        channel_id: state.channel_id.map(channel_id),
        server_mute: state.mute,
        self_deaf: state.self_deaf,
    })
}

/// Only plain unicode reactions can be panel controls.
pub(crate) fn unicode_emoji(reaction: &ReactionType) -> Option<&str> {
    match reaction {
        ReactionType::Unicode(emoji) => Some(emoji.as_str()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/convert_tests.rs"]
mod tests;
