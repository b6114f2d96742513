use std::{collections::VecDeque, sync::Arc};

use gateway::VoiceGateway;
use shared::domain::{GuildId, MemberId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ActuatorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    Issued,
    AlreadySatisfied,
}

const MAX_UNCONFIRMED: usize = 8;

struct MuteTracking {
    observed: bool,
    /// Issued flags whose voice-state echo has not arrived yet, oldest first.
    unconfirmed: VecDeque<bool>,
}

/// Owns one member's last known server mute and serializes the gateway call
/// that changes it.
pub struct MuteActuator {
    guild_id: GuildId,
    member_id: MemberId,
    gateway: Arc<dyn VoiceGateway>,
    tracking: Mutex<MuteTracking>,
}

impl MuteActuator {
    pub fn new(
        guild_id: GuildId,
        member_id: MemberId,
        observed_mute: bool,
        gateway: Arc<dyn VoiceGateway>,
    ) -> Self {
        Self {
            guild_id,
            member_id,
            gateway,
            tracking: Mutex::new(MuteTracking {
                observed: observed_mute,
                unconfirmed: VecDeque::new(),
            }),
        }
    }

    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    /// Brings the member's server mute to `desired`, calling the gateway only
    /// when the observed flag differs. The member lock is held across the
    /// call so the observed flag always reflects the last completed call.
    pub async fn apply_mute(&self, desired: bool) -> Result<Actuation, ActuatorError> {
        let mut tracking = self.tracking.lock().await;
        if tracking.observed == desired {
            return Ok(Actuation::AlreadySatisfied);
        }

        self.gateway
            .set_member_mute(self.guild_id, self.member_id, desired)
            .await
            .map_err(|source| ActuatorError {
                guild_id: self.guild_id,
                member_id: self.member_id,
                source,
            })?;

        tracking.observed = desired;
        tracking.unconfirmed.push_back(desired);
        if tracking.unconfirmed.len() > MAX_UNCONFIRMED {
            tracking.unconfirmed.pop_front();
        }
        debug!(
            guild = %self.guild_id,
            member = %self.member_id,
            mute = desired,
            "server mute applied"
        );
        Ok(Actuation::Issued)
    }

    pub async fn observed_mute(&self) -> bool {
        self.tracking.lock().await.observed
    }

    /// Records a mute flag reported by the gateway. Returns whether it is a
    /// change made by someone else.
    ///
    /// A report matching one of this actuator's unconfirmed calls is the
    /// echo of that call: it and every older unconfirmed call are settled and
    /// the observed flag is left alone.
    pub async fn record_external(&self, mute: bool) -> bool {
        let mut tracking = self.tracking.lock().await;
        if let Some(position) = tracking.unconfirmed.iter().position(|flag| *flag == mute) {
            tracking.unconfirmed.drain(..=position);
            return false;
        }
        let changed = tracking.observed != mute;
        tracking.observed = mute;
        changed
    }

    /// Takes a mute flag read from the gateway's cached voice state and
    /// returns the flag to trust. While calls are unconfirmed the cache may
    /// still predate them, so the observed flag wins.
    pub async fn resume(&self, reported: bool) -> bool {
        let mut tracking = self.tracking.lock().await;
        if tracking.unconfirmed.is_empty() {
            tracking.observed = reported;
        }
        tracking.observed
    }
}

#[cfg(test)]
#[path = "tests/actuator_tests.rs"]
mod tests;
