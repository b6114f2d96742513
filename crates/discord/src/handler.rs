use serenity::{
    async_trait,
    model::{
        channel::{Message, Reaction},
        gateway::Ready,
        guild::{Guild, UnavailableGuild},
        id::UserId,
        voice::VoiceState,
    },
    prelude::{Context, EventHandler},
};
use shared::{
    domain::MemberInfo,
    protocol::{voice_update_events, GatewayEvent, IncomingMessage},
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::convert::{
    channel_id, guild_id, member_id, member_info, message_id, role_ids, unicode_emoji,
    voice_snapshot,
};

/// Normalizes serenity events into [`GatewayEvent`]s on the engine's stream.
/// Activity of bots, including this one, is dropped here.
pub struct DiscordHandler {
    events: UnboundedSender<GatewayEvent>,
}

impl DiscordHandler {
    pub fn new(events: UnboundedSender<GatewayEvent>) -> Self {
        Self { events }
    }

    fn forward(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            warn!("engine event stream closed, dropping gateway event");
        }
    }
}

fn is_self(ctx: &Context, user_id: UserId) -> bool {
    ctx.cache.current_user().id == user_id
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "connected to discord");
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        self.forward(GatewayEvent::GuildAvailable {
            guild_id: guild_id(guild.id),
        });
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // An unavailable flag means an outage, not that the bot left.
        if incomplete.unavailable {
            debug!(guild = %incomplete.id, "guild became unavailable");
            return;
        }
        self.forward(GatewayEvent::GuildRemoved {
            guild_id: guild_id(incomplete.id),
        });
    }

    async fn message(&self, ctx: Context, message: Message) {
        let Some(guild) = message.guild_id else {
            return;
        };
        if message.author.bot || is_self(&ctx, message.author.id) {
            return;
        }

        let (display_name, roles) = match message.member.as_deref() {
            Some(partial) => (
                partial
                    .nick
                    .clone()
                    .unwrap_or_else(|| message.author.display_name().to_string()),
                role_ids(&partial.roles),
            ),
            None => (message.author.display_name().to_string(), Vec::new()),
        };
        let author_voice_channel = ctx.cache.guild(guild).and_then(|cached| {
            cached
                .voice_states
                .get(&message.author.id)
                .and_then(|state| state.channel_id)
                .map(channel_id)
        });

        self.forward(GatewayEvent::MessageReceived {
            guild_id: guild_id(guild),
            message: IncomingMessage {
                message_id: message_id(message.id),
                channel_id: channel_id(message.channel_id),
                author: MemberInfo::new(member_id(message.author.id), display_name)
                    .with_roles(roles),
                author_voice_channel,
                content: message.content.clone(),
                role_mentions: role_ids(&message.mention_roles),
            },
        });
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let (Some(guild), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
            return;
        };
        if is_self(&ctx, user_id) {
            return;
        }
        let Some(emoji) = unicode_emoji(&reaction.emoji) else {
            return;
        };
        let member = match &reaction.member {
            Some(member) if member.user.bot => return,
            Some(member) => member_info(member),
            None => MemberInfo::new(member_id(user_id), user_id.to_string()),
        };

        self.forward(GatewayEvent::ReactionAdded {
            guild_id: guild_id(guild),
            channel_id: channel_id(reaction.channel_id),
            message_id: message_id(reaction.message_id),
            emoji: emoji.to_string(),
            member,
        });
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild) = new.guild_id else {
            return;
        };
        if is_self(&ctx, new.user_id) {
            return;
        }

        let cached_member = || {
            ctx.cache
                .guild(guild)
                .and_then(|cached| cached.members.get(&new.user_id).map(member_info))
        };
        let member = match &new.member {
            Some(member) if member.user.bot => return,
            Some(member) => member_info(member),
            None => match cached_member() {
                Some(member) => member,
                None => {
                    debug!(guild = %guild, user = %new.user_id, "voice update for unknown member");
                    return;
                }
            },
        };

        for event in voice_update_events(
            guild_id(guild),
            member,
            voice_snapshot(old.as_ref()),
            voice_snapshot(Some(&new)),
        ) {
            self.forward(event);
        }
    }
}
