use std::collections::BTreeSet;

use anyhow::Result;
use shared::{
    domain::{channel_mention, role_mention, ChannelId, MemberInfo, MessageId, RoleId},
    protocol::{GatewayEvent, IncomingMessage},
};
use tracing::{debug, warn};

use crate::{
    commands::{help_text, parse_command, Command},
    error::{MuteReport, SessionError},
    panel::{MUTE_TOGGLE_EMOJI, RELAY_EMOJI, RESET_EMOJI},
    session::Session,
};

const NOT_IN_VOICE: &str =
    "not in any voice channel on this server! Please join a voice channel first!";

impl Session {
    /// Routes one event of this session's guild into the engine and refreshes
    /// the panel when something may have changed.
    pub async fn handle_event(&self, event: &GatewayEvent) -> Result<()> {
        let refresh = match event {
            GatewayEvent::VoiceStateChanged {
                member,
                before,
                after,
                ..
            } => {
                let report = self.on_voice_state_changed(member, *before, *after).await;
                self.notify_failures(&report).await;
                true
            }
            GatewayEvent::MuteExternallyChanged {
                member,
                before,
                after,
                ..
            } => self.on_external_mute_changed(member, *before, *after).await,
            GatewayEvent::MessageReceived { message, .. } => self.handle_message(message).await?,
            GatewayEvent::ReactionAdded {
                channel_id,
                message_id,
                emoji,
                member,
                ..
            } => {
                self.handle_reaction(*channel_id, *message_id, emoji, member)
                    .await
            }
            GatewayEvent::GuildAvailable { .. } | GatewayEvent::GuildRemoved { .. } => false,
        };

        if refresh {
            self.refresh_panel().await?;
        }
        Ok(())
    }

    /// Returns whether a command was recognized and executed.
    async fn handle_message(&self, message: &IncomingMessage) -> Result<bool> {
        let prefix = self.settings().command_prefix.clone();
        let Some(command) = parse_command(&prefix, &message.content) else {
            return Ok(false);
        };

        let text_channel = self.snapshot().await.text_channel;
        let in_text_channel = text_channel == Some(message.channel_id);
        match command {
            Command::Setup => self.setup(message).await?,
            Command::Text => self.claim_text_channel(message).await?,
            Command::Help => {
                self.reply(message.channel_id, &help_text(&prefix)).await;
                return Ok(false);
            }
            _ if !in_text_channel => return Ok(false),
            Command::Vc => self.track_author_voice(message).await?,
            Command::ExcludeRole => self.exclude_roles(message, true).await,
            Command::UnexcludeRole => self.exclude_roles(message, false).await,
            Command::Toggles(toggles) => {
                if let Err(error) = self
                    .gateway
                    .delete_message(message.channel_id, message.message_id)
                    .await
                {
                    debug!(guild = %self.guild_id(), error = %error, "toggle message not deleted");
                }
                let report = self.apply_toggles(&toggles).await;
                self.notify_failures(&report).await;
            }
        }
        Ok(true)
    }

    async fn setup(&self, message: &IncomingMessage) -> Result<()> {
        let author = &message.author;
        let Some(voice_channel) = message.author_voice_channel else {
            self.reply(
                message.channel_id,
                &format!("Error! User {} {NOT_IN_VOICE}", author.mention()),
            )
            .await;
            return Ok(());
        };

        let mut report = MuteReport::default();
        let text_changed = match self.set_text_channel(message.channel_id).await {
            Ok(text_report) => {
                report.merge(text_report);
                true
            }
            Err(_) => false,
        };
        let voice_changed = match self.set_voice_channel(Some(voice_channel)).await {
            Ok(voice_report) => {
                report.merge(voice_report);
                true
            }
            Err(_) => false,
        };

        if !text_changed && !voice_changed {
            self.reply(
                message.channel_id,
                &format!(
                    "Already set up! This is the command channel and currently tracking {}.",
                    channel_mention(voice_channel)
                ),
            )
            .await;
            return Ok(());
        }

        self.reply(
            message.channel_id,
            &format!(
                "All good! Listening for commands only on {} and tracking {}.",
                channel_mention(message.channel_id),
                channel_mention(voice_channel)
            ),
        )
        .await;
        self.notify_failures(&report).await;
        self.open_panel().await
    }

    async fn claim_text_channel(&self, message: &IncomingMessage) -> Result<()> {
        match self.set_text_channel(message.channel_id).await {
            Ok(report) => {
                self.reply(
                    message.channel_id,
                    &format!(
                        "Current channel {} set as the command channel!\nNow accepting commands here.",
                        channel_mention(message.channel_id)
                    ),
                )
                .await;
                self.notify_failures(&report).await;
                if self.snapshot().await.voice_channel.is_some() {
                    self.open_panel().await?;
                }
            }
            Err(_) => {
                self.reply(
                    message.channel_id,
                    "Error! This channel is already the command channel.",
                )
                .await;
            }
        }
        Ok(())
    }

    async fn track_author_voice(&self, message: &IncomingMessage) -> Result<()> {
        let author = &message.author;
        let target = message.author_voice_channel;
        match (self.set_voice_channel(target).await, target) {
            (Ok(report), Some(voice_channel)) => {
                self.reply(
                    message.channel_id,
                    &format!(
                        "{} set as tracked voice channel!",
                        channel_mention(voice_channel)
                    ),
                )
                .await;
                self.notify_failures(&report).await;
                self.open_panel().await?;
            }
            (Ok(_), None) => {
                self.close_panel().await;
                self.reply(
                    message.channel_id,
                    &format!(
                        "User {} not in any voice channel on this server. Stopped tracking voice channel.",
                        author.mention()
                    ),
                )
                .await;
            }
            (Err(_), Some(voice_channel)) => {
                self.reply(
                    message.channel_id,
                    &format!(
                        "Error! {} is already tracked. To untrack, run `{}vc` while not connected to any channel.",
                        channel_mention(voice_channel),
                        self.settings().command_prefix
                    ),
                )
                .await;
            }
            (Err(_), None) => {
                self.reply(
                    message.channel_id,
                    &format!("Error! User {} {NOT_IN_VOICE}", author.mention()),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn exclude_roles(&self, message: &IncomingMessage, exclude: bool) {
        let mentioned: BTreeSet<RoleId> = message.role_mentions.iter().copied().collect();
        if mentioned.is_empty() {
            let command = if exclude { "excluderole" } else { "unexcluderole" };
            self.reply(
                message.channel_id,
                &format!(
                    "Error! No role mentions detected!\nUsage: `{}{command} <role mention>...`",
                    self.settings().command_prefix
                ),
            )
            .await;
            return;
        }

        let result = self
            .update_excluded_roles(|current| {
                if exclude {
                    current.union(&mentioned).copied().collect()
                } else {
                    current.difference(&mentioned).copied().collect()
                }
            })
            .await;

        match result {
            Ok(report) => {
                let excluded = self.snapshot().await.excluded_roles;
                let reply = if excluded.is_empty() {
                    "No longer excluding any roles.".to_string()
                } else {
                    let mentions: Vec<String> =
                        excluded.into_iter().map(role_mention).collect();
                    format!("Now excluding roles:\n{}", mentions.join(" "))
                };
                self.reply(message.channel_id, &reply).await;
                self.notify_failures(&report).await;
            }
            Err(_) => {
                let reply = if exclude {
                    "Error! All mentioned roles were already excluded."
                } else {
                    "Error! None of the mentioned roles were excluded."
                };
                self.reply(message.channel_id, reply).await;
            }
        }
    }

    /// Returns whether the reaction landed on the panel.
    async fn handle_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        member: &MemberInfo,
    ) -> bool {
        let on_panel = self
            .snapshot()
            .await
            .panel
            .is_some_and(|panel| panel.message_id == message_id);
        if !on_panel {
            return false;
        }

        match emoji {
            MUTE_TOGGLE_EMOJI => {
                let report = self.toggle_global_mute().await;
                self.notify_failures(&report).await;
            }
            RELAY_EMOJI => match self.relay().await {
                None => {
                    if let Err(SessionError::NotEligible(member_id)) =
                        self.set_relay(Some(member.member_id)).await
                    {
                        debug!(guild = %self.guild_id(), member = %member_id, "relay candidate not eligible");
                    }
                }
                Some(relay) if relay == member.member_id => {
                    let _ = self.set_relay(None).await;
                }
                Some(_) => {}
            },
            RESET_EMOJI => {
                let report = self.reset_round().await;
                self.notify_failures(&report).await;
            }
            _ => {}
        }

        if let Err(error) = self
            .gateway
            .remove_reaction(channel_id, message_id, member.member_id, emoji)
            .await
        {
            debug!(guild = %self.guild_id(), error = %error, "panel reaction not removed");
        }
        true
    }

    async fn reply(&self, channel_id: ChannelId, content: &str) {
        if let Err(error) = self.gateway.send_message(channel_id, content).await {
            warn!(
                guild = %self.guild_id(),
                channel = %channel_id,
                error = %error,
                "failed to send reply"
            );
        }
    }

    async fn notify_failures(&self, report: &MuteReport) {
        if report.is_clean() {
            return;
        }
        let Some(text_channel) = self.snapshot().await.text_channel else {
            return;
        };
        let mentions: Vec<String> = report
            .failed_members()
            .into_iter()
            .map(|member_id| format!("<@{member_id}>"))
            .collect();
        self.reply(
            text_channel,
            &format!("Could not update server mute for {}.", mentions.join(" ")),
        )
        .await;
    }
}

#[cfg(test)]
#[path = "tests/ingress_tests.rs"]
mod tests;
