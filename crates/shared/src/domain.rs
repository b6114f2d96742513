use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(GuildId);
id_newtype!(ChannelId);
id_newtype!(MemberId);
id_newtype!(RoleId);
id_newtype!(MessageId);

/// Identity of a guild member as last reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub member_id: MemberId,
    pub display_name: String,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl MemberInfo {
    pub fn new(member_id: MemberId, display_name: impl Into<String>) -> Self {
        Self {
            member_id,
            display_name: display_name.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn has_any_role(&self, roles: &BTreeSet<RoleId>) -> bool {
        self.roles.iter().any(|role| roles.contains(role))
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.member_id)
    }
}

pub fn role_mention(role_id: RoleId) -> String {
    format!("<@&{role_id}>")
}

pub fn channel_mention(channel_id: ChannelId) -> String {
    format!("<#{channel_id}>")
}

/// The parts of a member's voice state the engine cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSnapshot {
    pub channel_id: Option<ChannelId>,
    /// Server-side (moderator) mute, the flag the engine actuates.
    pub server_mute: bool,
    pub self_deaf: bool,
}

impl VoiceSnapshot {
    pub fn in_channel(channel_id: ChannelId) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..Self::default()
        }
    }

    pub fn muted(mut self, server_mute: bool) -> Self {
        self.server_mute = server_mute;
        self
    }

    pub fn deafened(mut self, self_deaf: bool) -> Self {
        self.self_deaf = self_deaf;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeState {
    #[default]
    Alive,
    Dead,
}

impl LifeState {
    pub fn toggled(self) -> Self {
        match self {
            Self::Alive => Self::Dead,
            Self::Dead => Self::Alive,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Present,
    Away,
}
