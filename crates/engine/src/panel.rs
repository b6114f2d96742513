use anyhow::{Context, Result};
use shared::domain::{role_mention, ChannelId, MessageId};
use tracing::{debug, info, warn};

use crate::{
    member::MemberStatus,
    session::{Session, SessionSnapshot},
};

pub const MUTE_TOGGLE_EMOJI: &str = "🔈";
pub const RELAY_EMOJI: &str = "©";
pub const RESET_EMOJI: &str = "🔄";
pub const PANEL_REACTIONS: [&str; 3] = [MUTE_TOGGLE_EMOJI, RELAY_EMOJI, RESET_EMOJI];

const EMPTY_PANEL: &str = "```\n```";

/// Location of a session's status panel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

pub fn render_panel(snapshot: &SessionSnapshot) -> String {
    let mut text = format!(
        "**Muting:** `{}`\n**Tracked users:**\n",
        if snapshot.global_mute { "Yes" } else { "No" }
    );

    let name_width = snapshot
        .roster
        .iter()
        .map(|entry| entry.member.display_name.chars().count())
        .max()
        .unwrap_or(0);
    for entry in &snapshot.roster {
        let index = match entry.status() {
            MemberStatus::Away => " --".to_string(),
            _ => format!("{:>3}", entry.index),
        };
        let status = format!("({})", entry.status().label());
        text.push_str(&format!(
            "`{index}. {name:<name_width$} {status:>9}` {mention}\n",
            name = entry.member.display_name,
            mention = entry.member.mention(),
        ));
    }

    if !snapshot.excluded_roles.is_empty() {
        let roles: Vec<String> = snapshot
            .excluded_roles
            .iter()
            .copied()
            .map(role_mention)
            .collect();
        text.push_str(&format!("**Excluded roles:** {}\n", roles.join(" ")));
    }

    match &snapshot.relay {
        Some(relay) => text.push_str(&format!(
            "**Relay:** {}. Quickly deafen and undeafen yourself to toggle global mute.",
            relay.mention()
        )),
        None => text.push_str("No relay set! React with :copyright: to become the relay!"),
    }
    text
}

impl Session {
    /// Replaces any existing panel with a fresh message in the text channel.
    pub async fn open_panel(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(text_channel) = state.text_channel else {
            return Ok(());
        };
        if let Some(old) = state.panel.take() {
            if let Err(error) = self
                .gateway
                .delete_message(old.channel_id, old.message_id)
                .await
            {
                debug!(guild = %self.guild_id(), error = %error, "old panel could not be deleted");
            }
        }

        let message_id = self
            .gateway
            .send_message(text_channel, EMPTY_PANEL)
            .await
            .context("failed to send status panel")?;
        let panel = PanelRef {
            channel_id: text_channel,
            message_id,
        };
        state.panel = Some(panel);
        self.persist(&state).await;
        drop(state);

        for emoji in PANEL_REACTIONS {
            if let Err(error) = self
                .gateway
                .add_reaction(panel.channel_id, panel.message_id, emoji)
                .await
            {
                warn!(guild = %self.guild_id(), emoji, error = %error, "failed to add panel reaction");
            }
        }
        info!(guild = %self.guild_id(), message = %message_id, "status panel opened");
        self.refresh_panel().await
    }

    /// Re-renders the panel in place. Does nothing when there is no panel.
    pub async fn refresh_panel(&self) -> Result<()> {
        let snapshot = self.snapshot().await;
        let Some(panel) = snapshot.panel else {
            return Ok(());
        };
        self.gateway
            .edit_message(panel.channel_id, panel.message_id, &render_panel(&snapshot))
            .await
            .context("failed to edit status panel")
    }

    /// Deletes the panel and forgets it.
    pub async fn close_panel(&self) {
        let mut state = self.state.lock().await;
        let Some(panel) = state.panel.take() else {
            return;
        };
        if let Err(error) = self
            .gateway
            .delete_message(panel.channel_id, panel.message_id)
            .await
        {
            warn!(guild = %self.guild_id(), error = %error, "failed to delete status panel");
        }
        self.persist(&state).await;
    }

    pub(crate) async fn restore_panel(&self) {
        if let Err(error) = self.refresh_panel().await {
            warn!(guild = %self.guild_id(), error = %error, "stale status panel forgotten");
            let mut state = self.state.lock().await;
            state.panel = None;
            self.persist(&state).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/panel_tests.rs"]
mod tests;
