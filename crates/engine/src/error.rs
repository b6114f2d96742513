use std::fmt;

use shared::domain::{GuildId, MemberId};
use thiserror::Error;
use tracing::warn;

use crate::actuator::Actuation;

/// Configuration values that reject being set to their current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    TextChannel,
    VoiceChannel,
    ExcludedRoles,
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TextChannel => "text channel",
            Self::VoiceChannel => "voice channel",
            Self::ExcludedRoles => "excluded role set",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{0} already has that value")]
    NoOp(Setting),
    #[error("member {0} is not present in the tracked voice channel")]
    NotEligible(MemberId),
}

#[derive(Debug, Error)]
#[error("failed to set server mute for member {member_id} in guild {guild_id}: {source}")]
pub struct ActuatorError {
    pub guild_id: GuildId,
    pub member_id: MemberId,
    pub source: anyhow::Error,
}

/// Outcome of one actuator fan-out. Failures never abort sibling calls.
#[derive(Debug, Default)]
pub struct MuteReport {
    pub issued: usize,
    pub failures: Vec<ActuatorError>,
}

impl MuteReport {
    pub(crate) fn from_results(results: Vec<Result<Actuation, ActuatorError>>) -> Self {
        let mut report = Self::default();
        for result in results {
            match result {
                Ok(Actuation::Issued) => report.issued += 1,
                Ok(Actuation::AlreadySatisfied) => {}
                Err(error) => {
                    warn!(
                        guild = %error.guild_id,
                        member = %error.member_id,
                        error = %error.source,
                        "mute actuation failed"
                    );
                    report.failures.push(error);
                }
            }
        }
        report
    }

    pub(crate) fn merge(&mut self, other: MuteReport) {
        self.issued += other.issued;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_members(&self) -> Vec<MemberId> {
        self.failures.iter().map(|failure| failure.member_id).collect()
    }
}
