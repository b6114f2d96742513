use std::time::Duration;

use shared::domain::{MemberId, VoiceSnapshot};
use tokio::time::Instant;

/// Timing of the relay's deafen gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Longest deafen that still counts as a toggle gesture.
    pub gesture_window: Duration,
    /// Minimum time between two changes of the global mute flag via the relay.
    pub toggle_cooldown: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            gesture_window: Duration::from_millis(1_000),
            toggle_cooldown: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelaySignal {
    None,
    Deafened,
    GestureCompleted,
    GestureExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelayState {
    member: MemberId,
    deafened_at: Option<Instant>,
}

impl RelayState {
    pub(crate) fn assign(member: MemberId) -> Self {
        Self {
            member,
            deafened_at: None,
        }
    }

    pub(crate) fn member(&self) -> MemberId {
        self.member
    }

    pub(crate) fn is(&self, member: MemberId) -> bool {
        self.member == member
    }

    /// Feeds one in-channel voice update of the relay member.
    pub(crate) fn observe(
        &mut self,
        before: VoiceSnapshot,
        after: VoiceSnapshot,
        now: Instant,
        window: Duration,
    ) -> RelaySignal {
        match (before.self_deaf, after.self_deaf) {
            (false, true) => {
                self.deafened_at = Some(now);
                RelaySignal::Deafened
            }
            (true, false) => match self.deafened_at.take() {
                Some(at) if now.duration_since(at) <= window => RelaySignal::GestureCompleted,
                Some(_) => RelaySignal::GestureExpired,
                None => RelaySignal::None,
            },
            _ => RelaySignal::None,
        }
    }
}

pub(crate) fn cooldown_elapsed(last_change: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    last_change.map_or(true, |at| now.duration_since(at) >= cooldown)
}
