use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use futures::future::join_all;
use gateway::VoiceGateway;
use shared::domain::{
    ChannelId, GuildId, LifeState, MemberId, MemberInfo, Presence, RoleId, VoiceSnapshot,
};
use storage::{ConfigStore, SessionConfig};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    actuator::MuteActuator,
    error::{MuteReport, SessionError, Setting},
    member::{RosterEntry, TrackedMember},
    panel::PanelRef,
    relay::{cooldown_elapsed, RelaySettings, RelaySignal, RelayState},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub command_prefix: String,
    pub relay: RelaySettings,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_prefix: "among:".to_string(),
            relay: RelaySettings::default(),
        }
    }
}

/// One entry of a toggle batch, addressed by 1-based roster position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexToggle {
    Life(usize),
    Ignore(usize),
}

/// Consistent copy of a session's observable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub text_channel: Option<ChannelId>,
    pub voice_channel: Option<ChannelId>,
    pub panel: Option<PanelRef>,
    pub excluded_roles: Vec<RoleId>,
    pub global_mute: bool,
    pub relay: Option<MemberInfo>,
    pub roster: Vec<RosterEntry>,
}

impl SessionSnapshot {
    pub fn tracking_active(&self) -> bool {
        self.text_channel.is_some() && self.voice_channel.is_some()
    }

    pub fn entry(&self, member_id: MemberId) -> Option<&RosterEntry> {
        self.roster
            .iter()
            .find(|entry| entry.member.member_id == member_id)
    }
}

pub(crate) struct SessionState {
    pub(crate) text_channel: Option<ChannelId>,
    pub(crate) voice_channel: Option<ChannelId>,
    pub(crate) excluded_roles: BTreeSet<RoleId>,
    pub(crate) global_mute: bool,
    last_mute_change: Option<Instant>,
    relay: Option<RelayState>,
    pub(crate) panel: Option<PanelRef>,
    roster: Vec<TrackedMember>,
}

impl SessionState {
    fn from_config(config: &SessionConfig) -> Self {
        let panel = match (config.text, config.control) {
            (Some(channel_id), Some(message_id)) => Some(PanelRef {
                channel_id,
                message_id,
            }),
            _ => None,
        };
        Self {
            text_channel: config.text,
            voice_channel: config.voice,
            excluded_roles: config.exclude.iter().copied().collect(),
            global_mute: false,
            last_mute_change: None,
            relay: None,
            panel,
            roster: Vec::new(),
        }
    }

    pub(crate) fn config(&self) -> SessionConfig {
        SessionConfig {
            text: self.text_channel,
            voice: self.voice_channel,
            control: self.panel.map(|panel| panel.message_id),
            exclude: self.excluded_roles.iter().copied().collect(),
        }
    }

    fn tracking_active(&self) -> bool {
        self.text_channel.is_some() && self.voice_channel.is_some()
    }

    fn position(&self, member_id: MemberId) -> Option<usize> {
        self.roster
            .iter()
            .position(|member| member.member_id() == member_id)
    }

    fn relay_is(&self, member_id: MemberId) -> bool {
        self.relay.as_ref().is_some_and(|relay| relay.is(member_id))
    }

    fn set_global_flag(&mut self, mute: bool) {
        if self.global_mute != mute {
            self.global_mute = mute;
            self.last_mute_change = Some(Instant::now());
        }
    }

    fn clear_roster(&mut self) {
        self.roster.clear();
        self.relay = None;
        self.set_global_flag(false);
    }

    /// Brings every tracked member to its derived mute. All calls run
    /// concurrently and are awaited before returning.
    async fn reconcile(&self) -> MuteReport {
        let calls = self.roster.iter().filter_map(|member| {
            let desired = member.desired_mute(self.global_mute)?;
            let actuator = Arc::clone(&member.actuator);
            Some(async move { actuator.apply_mute(desired).await })
        });
        MuteReport::from_results(join_all(calls).await)
    }

    pub(crate) async fn snapshot(&self, guild_id: GuildId) -> SessionSnapshot {
        let mut roster = Vec::with_capacity(self.roster.len());
        for (offset, member) in self.roster.iter().enumerate() {
            roster.push(member.entry(offset + 1).await);
        }
        let relay = self.relay.as_ref().and_then(|relay| {
            self.roster
                .iter()
                .find(|member| relay.is(member.member_id()))
                .map(|member| member.info.clone())
        });
        SessionSnapshot {
            guild_id,
            text_channel: self.text_channel,
            voice_channel: self.voice_channel,
            panel: self.panel,
            excluded_roles: self.excluded_roles.iter().copied().collect(),
            global_mute: self.global_mute,
            relay,
            roster,
        }
    }
}

/// Presence and mute state for one guild.
///
/// Every mutating operation takes the session lock and keeps it until all
/// actuator calls it started have completed.
pub struct Session {
    guild_id: GuildId,
    pub(crate) gateway: Arc<dyn VoiceGateway>,
    store: Arc<dyn ConfigStore>,
    settings: SessionSettings,
    pub(crate) state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        guild_id: GuildId,
        gateway: Arc<dyn VoiceGateway>,
        store: Arc<dyn ConfigStore>,
        settings: SessionSettings,
    ) -> Self {
        Self::with_config(guild_id, &SessionConfig::default(), gateway, store, settings)
    }

    fn with_config(
        guild_id: GuildId,
        config: &SessionConfig,
        gateway: Arc<dyn VoiceGateway>,
        store: Arc<dyn ConfigStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            guild_id,
            gateway,
            store,
            settings,
            state: Mutex::new(SessionState::from_config(config)),
        }
    }

    /// Rebuilds a session from persisted configuration. The roster is derived
    /// from the gateway's current voice occupants, and a panel that can no
    /// longer be edited is forgotten.
    pub async fn restore(
        guild_id: GuildId,
        config: &SessionConfig,
        gateway: Arc<dyn VoiceGateway>,
        store: Arc<dyn ConfigStore>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let session = Arc::new(Self::with_config(guild_id, config, gateway, store, settings));
        {
            let mut state = session.state.lock().await;
            // A panel id without a text channel cannot be addressed.
            if state.panel.is_none() && config.control.is_some() {
                session.persist(&state).await;
            }
            if state.tracking_active() {
                session.resync_locked(&mut state).await;
            }
        }
        session.restore_panel().await;
        info!(guild = %guild_id, "session restored");
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot(self.guild_id).await
    }

    pub async fn global_mute(&self) -> bool {
        self.state.lock().await.global_mute
    }

    pub async fn relay(&self) -> Option<MemberId> {
        self.state.lock().await.relay.as_ref().map(RelayState::member)
    }

    pub(crate) async fn persist(&self, state: &SessionState) {
        if let Err(error) = self.store.save_config(self.guild_id, &state.config()).await {
            warn!(guild = %self.guild_id, error = %error, "failed to persist session config");
        }
    }

    pub async fn set_text_channel(&self, channel_id: ChannelId) -> Result<MuteReport, SessionError> {
        let mut state = self.state.lock().await;
        if state.text_channel == Some(channel_id) {
            return Err(SessionError::NoOp(Setting::TextChannel));
        }
        let was_active = state.tracking_active();
        state.text_channel = Some(channel_id);
        self.persist(&state).await;
        info!(guild = %self.guild_id, channel = %channel_id, "text channel set");

        if !was_active && state.tracking_active() {
            return Ok(self.resync_locked(&mut state).await);
        }
        Ok(MuteReport::default())
    }

    /// Replaces the tracked voice channel. `None` stops tracking and drops the
    /// roster without touching anyone's mute.
    pub async fn set_voice_channel(
        &self,
        channel_id: Option<ChannelId>,
    ) -> Result<MuteReport, SessionError> {
        let mut state = self.state.lock().await;
        if state.voice_channel == channel_id {
            return Err(SessionError::NoOp(Setting::VoiceChannel));
        }
        state.voice_channel = channel_id;
        self.persist(&state).await;

        match channel_id {
            Some(channel_id) => {
                info!(guild = %self.guild_id, channel = %channel_id, "voice channel set");
                Ok(self.resync_locked(&mut state).await)
            }
            None => {
                info!(guild = %self.guild_id, "voice channel cleared, tracking stopped");
                state.clear_roster();
                Ok(MuteReport::default())
            }
        }
    }

    pub async fn resync_roster(&self) -> MuteReport {
        let mut state = self.state.lock().await;
        self.resync_locked(&mut state).await
    }

    async fn resync_locked(&self, state: &mut SessionState) -> MuteReport {
        state.set_global_flag(false);
        let mut report = state.reconcile().await;

        let mut previous: HashMap<MemberId, Arc<MuteActuator>> = state
            .roster
            .drain(..)
            .map(|member| (member.member_id(), member.actuator))
            .collect();
        let voice_channel = match state.voice_channel {
            Some(channel_id) if state.tracking_active() => channel_id,
            _ => {
                state.relay = None;
                return report;
            }
        };

        let occupants = match self
            .gateway
            .voice_occupants(self.guild_id, voice_channel)
            .await
        {
            Ok(occupants) => occupants,
            Err(error) => {
                warn!(
                    guild = %self.guild_id,
                    channel = %voice_channel,
                    error = %error,
                    "failed to list voice occupants"
                );
                Vec::new()
            }
        };

        for occupant in occupants {
            if occupant.member.has_any_role(&state.excluded_roles) {
                continue;
            }
            let tracked = match previous.remove(&occupant.member.member_id) {
                Some(actuator) => {
                    TrackedMember::resumed(
                        self.guild_id,
                        occupant.member,
                        occupant.voice,
                        state.global_mute,
                        actuator,
                    )
                    .await
                }
                None => TrackedMember::observed(
                    self.guild_id,
                    occupant.member,
                    occupant.voice,
                    state.global_mute,
                    Arc::clone(&self.gateway),
                ),
            };
            state.roster.push(tracked);
        }
        if let Some(relay) = state.relay.as_ref().map(RelayState::member) {
            if state.position(relay).is_none() {
                state.relay = None;
            }
        }
        debug!(
            guild = %self.guild_id,
            channel = %voice_channel,
            tracked = state.roster.len(),
            "roster rebuilt"
        );

        report.merge(state.reconcile().await);
        report
    }

    pub async fn set_global_mute(&self, mute: bool) -> MuteReport {
        let mut state = self.state.lock().await;
        state.set_global_flag(mute);
        debug!(guild = %self.guild_id, mute, "global mute set");
        state.reconcile().await
    }

    pub async fn toggle_global_mute(&self) -> MuteReport {
        let mut state = self.state.lock().await;
        let mute = !state.global_mute;
        state.set_global_flag(mute);
        debug!(guild = %self.guild_id, mute, "global mute toggled");
        state.reconcile().await
    }

    pub async fn set_excluded_roles(
        &self,
        roles: BTreeSet<RoleId>,
    ) -> Result<MuteReport, SessionError> {
        self.update_excluded_roles(|_| roles).await
    }

    /// Computes the new excluded set from the current one under the session
    /// lock, so unions and differences never race other commands.
    pub async fn update_excluded_roles<F>(&self, update: F) -> Result<MuteReport, SessionError>
    where
        F: FnOnce(&BTreeSet<RoleId>) -> BTreeSet<RoleId>,
    {
        let mut state = self.state.lock().await;
        let roles = update(&state.excluded_roles);
        if roles == state.excluded_roles {
            return Err(SessionError::NoOp(Setting::ExcludedRoles));
        }

        let added: BTreeSet<RoleId> = roles.difference(&state.excluded_roles).copied().collect();
        let removed: BTreeSet<RoleId> =
            state.excluded_roles.difference(&roles).copied().collect();
        let mut report = MuteReport::default();

        if !added.is_empty() {
            let (covered, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.roster)
                .into_iter()
                .partition(|member| member.info.has_any_role(&added));
            state.roster = kept;

            let releases = covered
                .iter()
                .filter(|member| member.is_present() && !member.ignored)
                .map(|member| {
                    let actuator = Arc::clone(&member.actuator);
                    async move { actuator.apply_mute(false).await }
                });
            report.merge(MuteReport::from_results(join_all(releases).await));

            if covered.iter().any(|member| state.relay_is(member.member_id())) {
                state.relay = None;
            }
            debug!(
                guild = %self.guild_id,
                untracked = covered.len(),
                "members released by newly excluded roles"
            );
        }

        state.excluded_roles = roles;

        if !removed.is_empty() && state.tracking_active() {
            if let Some(voice_channel) = state.voice_channel {
                match self
                    .gateway
                    .voice_occupants(self.guild_id, voice_channel)
                    .await
                {
                    Ok(occupants) => {
                        for occupant in occupants {
                            let now_eligible = occupant.member.has_any_role(&removed)
                                && !occupant.member.has_any_role(&state.excluded_roles);
                            if now_eligible && state.position(occupant.member.member_id).is_none()
                            {
                                state.roster.push(TrackedMember::eligible(
                                    self.guild_id,
                                    occupant.member,
                                    occupant.voice,
                                    Arc::clone(&self.gateway),
                                ));
                            }
                        }
                        report.merge(state.reconcile().await);
                    }
                    Err(error) => warn!(
                        guild = %self.guild_id,
                        channel = %voice_channel,
                        error = %error,
                        "failed to list voice occupants"
                    ),
                }
            }
        }

        self.persist(&state).await;
        info!(
            guild = %self.guild_id,
            excluded = state.excluded_roles.len(),
            "excluded roles updated"
        );
        Ok(report)
    }

    pub async fn toggle_life_state(&self, index: usize) -> MuteReport {
        self.apply_toggles(&[IndexToggle::Life(index)]).await
    }

    pub async fn toggle_ignored(&self, index: usize) -> MuteReport {
        self.apply_toggles(&[IndexToggle::Ignore(index)]).await
    }

    /// Applies a batch of 1-based toggles against the roster as it was when
    /// the batch started, then re-applies the global mute once. Positions
    /// outside the roster are skipped.
    pub async fn apply_toggles(&self, toggles: &[IndexToggle]) -> MuteReport {
        let mut state = self.state.lock().await;
        let targets: Vec<(MemberId, IndexToggle)> = toggles
            .iter()
            .filter_map(|toggle| {
                let index = match *toggle {
                    IndexToggle::Life(index) | IndexToggle::Ignore(index) => index,
                };
                let member = state.roster.get(index.checked_sub(1)?)?;
                Some((member.member_id(), *toggle))
            })
            .collect();

        for (member_id, toggle) in targets {
            let Some(position) = state.position(member_id) else {
                continue;
            };
            let member = &mut state.roster[position];
            match toggle {
                IndexToggle::Life(_) if member.ignored => {}
                IndexToggle::Life(_) => member.life = member.life.toggled(),
                IndexToggle::Ignore(_) => member.ignored = !member.ignored,
            }
            debug!(
                guild = %self.guild_id,
                member = %member_id,
                life = ?member.life,
                ignored = member.ignored,
                "member toggled"
            );
        }

        state.reconcile().await
    }

    /// Starts a new round: everyone is alive again and global mute is off.
    pub async fn reset_round(&self) -> MuteReport {
        let mut state = self.state.lock().await;
        for member in &mut state.roster {
            member.life = LifeState::Alive;
        }
        state.set_global_flag(false);
        info!(guild = %self.guild_id, "round reset");
        state.reconcile().await
    }

    pub async fn set_relay(&self, member_id: Option<MemberId>) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        match member_id {
            None => {
                state.relay = None;
                info!(guild = %self.guild_id, "relay cleared");
            }
            Some(member_id) => {
                let eligible = state
                    .position(member_id)
                    .is_some_and(|position| state.roster[position].is_present());
                if !eligible {
                    return Err(SessionError::NotEligible(member_id));
                }
                state.relay = Some(RelayState::assign(member_id));
                info!(guild = %self.guild_id, member = %member_id, "relay assigned");
            }
        }
        Ok(())
    }

    /// Reconciles membership and the relay gesture for one voice update.
    pub async fn on_voice_state_changed(
        &self,
        member: &MemberInfo,
        before: VoiceSnapshot,
        after: VoiceSnapshot,
    ) -> MuteReport {
        let mut state = self.state.lock().await;
        let mut report = MuteReport::default();
        let Some(voice_channel) = state.voice_channel.filter(|_| state.tracking_active()) else {
            return report;
        };
        if member.has_any_role(&state.excluded_roles) {
            // Roles can change outside the bot; a tracked member who gained
            // an excluded role is released and untracked.
            if let Some(position) = state.position(member.member_id) {
                let released = state.roster.remove(position);
                if released.is_present()
                    && !released.ignored
                    && after.channel_id == Some(voice_channel)
                {
                    let result = released.actuator.apply_mute(false).await;
                    report.merge(MuteReport::from_results(vec![result]));
                }
                if state.relay_is(member.member_id) {
                    state.relay = None;
                }
                debug!(
                    guild = %self.guild_id,
                    member = %member.member_id,
                    "member gained an excluded role, untracked"
                );
                if !state.roster.iter().any(TrackedMember::is_present) {
                    state.clear_roster();
                    info!(guild = %self.guild_id, "voice channel emptied, roster reset");
                }
            }
            return report;
        }

        if state.relay_is(member.member_id) {
            if after.channel_id == Some(voice_channel) {
                let now = Instant::now();
                let window = self.settings.relay.gesture_window;
                let signal = state
                    .relay
                    .as_mut()
                    .map_or(RelaySignal::None, |relay| relay.observe(before, after, now, window));
                if signal == RelaySignal::GestureCompleted {
                    if cooldown_elapsed(
                        state.last_mute_change,
                        now,
                        self.settings.relay.toggle_cooldown,
                    ) {
                        let mute = !state.global_mute;
                        state.set_global_flag(mute);
                        info!(guild = %self.guild_id, mute, "relay toggled global mute");
                        report.merge(state.reconcile().await);
                    } else {
                        debug!(guild = %self.guild_id, "relay gesture inside cooldown");
                    }
                }
            } else {
                state.relay = None;
                info!(guild = %self.guild_id, member = %member.member_id, "relay left the voice channel");
            }
        }

        if before.channel_id == after.channel_id {
            return report;
        }

        if after.channel_id == Some(voice_channel) {
            match state.position(member.member_id) {
                Some(position) => {
                    let global_mute = state.global_mute;
                    let tracked = &mut state.roster[position];
                    tracked.presence = Presence::Present;
                    tracked.info = member.clone();
                    tracked.actuator.record_external(after.server_mute).await;
                    if let Some(desired) = tracked.desired_mute(global_mute) {
                        let result = tracked.actuator.apply_mute(desired).await;
                        report.merge(MuteReport::from_results(vec![result]));
                    }
                    debug!(guild = %self.guild_id, member = %member.member_id, "member rejoined");
                }
                None => {
                    let tracked = TrackedMember::observed(
                        self.guild_id,
                        member.clone(),
                        after,
                        state.global_mute,
                        Arc::clone(&self.gateway),
                    );
                    debug!(
                        guild = %self.guild_id,
                        member = %member.member_id,
                        ignored = tracked.ignored,
                        "member joined"
                    );
                    state.roster.push(tracked);
                }
            }
        } else if before.channel_id == Some(voice_channel) {
            if let Some(position) = state.position(member.member_id) {
                state.roster[position].presence = Presence::Away;
                debug!(guild = %self.guild_id, member = %member.member_id, "member left");
            }
            if !state.roster.iter().any(TrackedMember::is_present) {
                state.clear_roster();
                info!(guild = %self.guild_id, "voice channel emptied, roster reset");
            }
        }

        report
    }

    /// Marks a present member ignored when their server mute was changed by
    /// someone else. Returns whether the member became ignored.
    pub async fn on_external_mute_changed(
        &self,
        member: &MemberInfo,
        before: bool,
        after: bool,
    ) -> bool {
        let mut state = self.state.lock().await;
        if !state.tracking_active() || before == after {
            return false;
        }
        let Some(position) = state.position(member.member_id) else {
            return false;
        };
        let tracked = &mut state.roster[position];
        if !tracked.is_present() {
            return false;
        }
        let differed = tracked.actuator.record_external(after).await;
        if !differed || tracked.ignored {
            return false;
        }
        tracked.ignored = true;
        info!(
            guild = %self.guild_id,
            member = %member.member_id,
            mute = after,
            "server mute changed externally, member now ignored"
        );
        true
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod relay_tests;
