use std::sync::Arc;

use gateway::VoiceGateway;
use shared::domain::{GuildId, LifeState, MemberId, MemberInfo, Presence, VoiceSnapshot};

use crate::actuator::MuteActuator;

/// Mute the engine wants for a member, or `None` when it must not be touched.
///
/// Ignored and away members are left alone; death forces mute; everyone else
/// follows the session's global flag.
pub fn desired_mute(
    life: LifeState,
    ignored: bool,
    presence: Presence,
    global_mute: bool,
) -> Option<bool> {
    if ignored || presence == Presence::Away {
        return None;
    }
    match life {
        LifeState::Dead => Some(true),
        LifeState::Alive => Some(global_mute),
    }
}

pub struct TrackedMember {
    pub(crate) info: MemberInfo,
    /// Owning session, held as an identity rather than a pointer.
    pub(crate) session: GuildId,
    pub(crate) life: LifeState,
    pub(crate) ignored: bool,
    pub(crate) presence: Presence,
    pub(crate) actuator: Arc<MuteActuator>,
}

impl TrackedMember {
    /// A member seen for the first time this epoch. Members whose current
    /// server mute disagrees with the session start out ignored.
    pub(crate) fn observed(
        session: GuildId,
        info: MemberInfo,
        voice: VoiceSnapshot,
        global_mute: bool,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Self {
        let mut member = Self::eligible(session, info, voice, gateway);
        member.ignored = voice.server_mute != global_mute;
        member
    }

    /// A member carried over from the previous roster. The cached voice state
    /// is checked against the calls its actuator still has in flight.
    pub(crate) async fn resumed(
        session: GuildId,
        info: MemberInfo,
        voice: VoiceSnapshot,
        global_mute: bool,
        actuator: Arc<MuteActuator>,
    ) -> Self {
        let server_mute = actuator.resume(voice.server_mute).await;
        Self {
            info,
            session,
            life: LifeState::Alive,
            ignored: server_mute != global_mute,
            presence: Presence::Present,
            actuator,
        }
    }

    pub(crate) fn eligible(
        session: GuildId,
        info: MemberInfo,
        voice: VoiceSnapshot,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Self {
        let actuator = Arc::new(MuteActuator::new(
            session,
            info.member_id,
            voice.server_mute,
            gateway,
        ));
        Self {
            info,
            session,
            life: LifeState::Alive,
            ignored: false,
            presence: Presence::Present,
            actuator,
        }
    }

    pub fn member_id(&self) -> MemberId {
        self.info.member_id
    }

    pub fn info(&self) -> &MemberInfo {
        &self.info
    }

    pub fn session(&self) -> GuildId {
        self.session
    }

    pub fn is_present(&self) -> bool {
        self.presence == Presence::Present
    }

    pub fn desired_mute(&self, global_mute: bool) -> Option<bool> {
        desired_mute(self.life, self.ignored, self.presence, global_mute)
    }

    pub(crate) async fn entry(&self, index: usize) -> RosterEntry {
        RosterEntry {
            index,
            member: self.info.clone(),
            life: self.life,
            ignored: self.ignored,
            presence: self.presence,
            server_muted: self.actuator.observed_mute().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Alive,
    Muted,
    Dead,
    Ignored,
    Away,
}

impl MemberStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Alive => "ALIVE",
            Self::Muted => "MUTED",
            Self::Dead => "DEAD",
            Self::Ignored => "IGNORED",
            Self::Away => "AWAY",
        }
    }
}

/// Read-only view of one roster position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// 1-based position used by toggle commands.
    pub index: usize,
    pub member: MemberInfo,
    pub life: LifeState,
    pub ignored: bool,
    pub presence: Presence,
    pub server_muted: bool,
}

impl RosterEntry {
    pub fn status(&self) -> MemberStatus {
        if self.presence == Presence::Away {
            MemberStatus::Away
        } else if self.ignored {
            MemberStatus::Ignored
        } else if self.life == LifeState::Dead {
            MemberStatus::Dead
        } else if self.server_muted {
            MemberStatus::Muted
        } else {
            MemberStatus::Alive
        }
    }
}
