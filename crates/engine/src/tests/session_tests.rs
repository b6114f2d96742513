use super::*;
use crate::test_support::*;

fn roles(ids: &[u64]) -> BTreeSet<RoleId> {
    ids.iter().copied().map(RoleId).collect()
}

#[tokio::test]
async fn join_into_empty_roster_tracks_member() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");

    harness.join(&alice, false).await;

    let snapshot = harness.session.snapshot().await;
    assert_eq!(snapshot.roster.len(), 1);
    let entry = &snapshot.roster[0];
    assert_eq!(entry.index, 1);
    assert_eq!(entry.member, alice);
    assert_eq!(entry.life, LifeState::Alive);
    assert!(!entry.ignored);
    assert_eq!(entry.presence, Presence::Present);
}

#[tokio::test]
async fn roster_stays_empty_until_both_channels_are_set() {
    let harness = Harness::new();
    let alice = member(1, "alice");
    harness.gateway.seat(VOICE, alice.clone(), false).await;

    harness
        .session
        .set_voice_channel(Some(VOICE))
        .await
        .expect("voice channel");
    harness.join(&alice, false).await;
    assert!(harness.session.snapshot().await.roster.is_empty());

    harness
        .session
        .set_text_channel(TEXT)
        .await
        .expect("text channel");
    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.tracking_active());
    assert_eq!(snapshot.roster.len(), 1);
}

#[tokio::test]
async fn dead_members_stay_muted_when_global_mute_lifts() {
    let harness = Harness::new();
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.gateway.seat(VOICE, alice.clone(), false).await;
    harness.gateway.seat(VOICE, bob.clone(), false).await;
    let harness = harness.tracking().await;

    harness.session.toggle_life_state(2).await;
    let report = harness.session.set_global_mute(true).await;
    assert!(report.is_clean());
    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.roster.iter().all(|entry| entry.server_muted));

    harness.session.toggle_life_state(1).await;
    harness.session.set_global_mute(false).await;

    let snapshot = harness.session.snapshot().await;
    assert!(!snapshot.global_mute);
    assert!(snapshot.roster.iter().all(|entry| entry.server_muted));
    assert!(harness
        .gateway
        .mute_calls()
        .await
        .iter()
        .all(|(_, mute)| *mute));
}

#[tokio::test]
async fn last_present_member_leaving_resets_the_roster() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;
    harness.session.set_global_mute(true).await;

    harness.leave(&alice, true).await;
    let snapshot = harness.session.snapshot().await;
    assert_eq!(snapshot.roster.len(), 2);
    assert_eq!(
        snapshot.entry(alice.member_id).expect("alice").presence,
        Presence::Away
    );

    harness.leave(&bob, true).await;
    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.roster.is_empty());
    assert!(!snapshot.global_mute);
}

#[tokio::test]
async fn away_members_are_left_alone() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;
    harness.leave(&alice, false).await;

    harness.session.set_global_mute(true).await;

    assert!(harness
        .gateway
        .mute_calls_for(alice.member_id)
        .await
        .is_empty());
    assert_eq!(harness.gateway.mute_calls_for(bob.member_id).await, vec![true]);
}

#[tokio::test]
async fn members_muted_by_someone_else_start_ignored() {
    let harness = Harness::new();
    let alice = member(1, "alice");
    harness.gateway.seat(VOICE, alice.clone(), true).await;
    let harness = harness.tracking().await;

    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.roster[0].ignored);

    harness.session.set_global_mute(true).await;
    harness.session.set_global_mute(false).await;
    assert!(harness.gateway.mute_calls().await.is_empty());
}

#[tokio::test]
async fn joining_with_matching_mute_is_not_ignored() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.session.set_global_mute(true).await;

    harness.join(&bob, true).await;
    let snapshot = harness.session.snapshot().await;
    assert!(!snapshot.entry(bob.member_id).expect("bob").ignored);
}

#[tokio::test]
async fn identical_excluded_roles_are_rejected() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    let before = harness.session.snapshot().await;

    let error = harness
        .session
        .set_excluded_roles(BTreeSet::new())
        .await
        .expect_err("same set");
    assert_eq!(error, SessionError::NoOp(Setting::ExcludedRoles));
    assert_eq!(harness.session.snapshot().await, before);
}

#[tokio::test]
async fn excluding_a_role_releases_and_untracks_its_members() {
    let harness = Harness::new();
    let alice = member(1, "alice").with_roles([RoleId(5)]);
    let bob = member(2, "bob");
    harness.gateway.seat(VOICE, alice.clone(), false).await;
    harness.gateway.seat(VOICE, bob.clone(), false).await;
    let harness = harness.tracking().await;
    harness.session.set_global_mute(true).await;

    let report = harness
        .session
        .set_excluded_roles(roles(&[5]))
        .await
        .expect("exclude");

    assert!(report.is_clean());
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false]
    );
    let snapshot = harness.session.snapshot().await;
    assert_eq!(snapshot.roster.len(), 1);
    assert_eq!(snapshot.roster[0].member, bob);
    let saved = harness
        .store
        .load_config(GUILD)
        .await
        .expect("load")
        .expect("saved");
    assert_eq!(saved.exclude, vec![RoleId(5)]);
}

#[tokio::test]
async fn unexcluding_a_role_tracks_present_occupants() {
    let harness = Harness::new();
    harness
        .session
        .set_excluded_roles(roles(&[5]))
        .await
        .expect("exclude");
    let alice = member(1, "alice").with_roles([RoleId(5)]);
    let bob = member(2, "bob");
    harness.gateway.seat(VOICE, alice.clone(), false).await;
    harness.gateway.seat(VOICE, bob.clone(), false).await;
    let harness = harness.tracking().await;
    assert_eq!(harness.session.snapshot().await.roster.len(), 1);
    harness.session.set_global_mute(true).await;

    harness
        .session
        .set_excluded_roles(BTreeSet::new())
        .await
        .expect("unexclude");

    let snapshot = harness.session.snapshot().await;
    assert_eq!(snapshot.roster.len(), 2);
    let entry = snapshot.entry(alice.member_id).expect("alice tracked");
    assert!(!entry.ignored);
    assert!(entry.server_muted);
    assert_eq!(harness.gateway.mute_calls_for(alice.member_id).await, vec![true]);
}

#[tokio::test]
async fn swapping_excluded_roles_runs_both_directions() {
    let harness = Harness::new();
    harness
        .session
        .set_excluded_roles(roles(&[5]))
        .await
        .expect("exclude");
    let alice = member(1, "alice").with_roles([RoleId(5)]);
    let carol = member(3, "carol").with_roles([RoleId(6)]);
    harness.gateway.seat(VOICE, alice.clone(), false).await;
    harness.gateway.seat(VOICE, carol.clone(), false).await;
    let harness = harness.tracking().await;

    harness
        .session
        .set_excluded_roles(roles(&[6]))
        .await
        .expect("swap");

    let snapshot = harness.session.snapshot().await;
    assert_eq!(snapshot.roster.len(), 1);
    assert_eq!(snapshot.roster[0].member, alice);
    assert_eq!(snapshot.excluded_roles, vec![RoleId(6)]);
}

#[tokio::test]
async fn excluded_members_joining_are_not_tracked() {
    let harness = Harness::new().tracking().await;
    harness
        .session
        .set_excluded_roles(roles(&[9]))
        .await
        .expect("exclude");

    harness
        .join(&member(4, "music").with_roles([RoleId(9)]), false)
        .await;
    assert!(harness.session.snapshot().await.roster.is_empty());
}

#[tokio::test]
async fn resetting_a_channel_to_its_value_is_a_no_op() {
    let harness = Harness::new().tracking().await;

    assert_eq!(
        harness.session.set_text_channel(TEXT).await.expect_err("same text"),
        SessionError::NoOp(Setting::TextChannel)
    );
    assert_eq!(
        harness
            .session
            .set_voice_channel(Some(VOICE))
            .await
            .expect_err("same voice"),
        SessionError::NoOp(Setting::VoiceChannel)
    );
}

#[tokio::test]
async fn clearing_voice_channel_stops_tracking() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    harness
        .session
        .set_relay(Some(alice.member_id))
        .await
        .expect("relay");

    harness
        .session
        .set_voice_channel(None)
        .await
        .expect("clear voice");
    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.roster.is_empty());
    assert!(snapshot.relay.is_none());

    harness.join(&member(2, "bob"), false).await;
    assert!(harness.session.snapshot().await.roster.is_empty());
}

#[tokio::test]
async fn moving_to_another_voice_channel_rebuilds_the_roster() {
    let harness = Harness::new();
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.gateway.seat(VOICE, alice.clone(), false).await;
    harness.gateway.seat(LOBBY, bob.clone(), false).await;
    let harness = harness.tracking().await;
    harness.session.set_global_mute(true).await;

    harness
        .session
        .set_voice_channel(Some(LOBBY))
        .await
        .expect("move");

    let snapshot = harness.session.snapshot().await;
    assert!(!snapshot.global_mute);
    assert_eq!(snapshot.roster.len(), 1);
    assert_eq!(snapshot.roster[0].member, bob);
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false]
    );
}

#[tokio::test]
async fn external_mute_change_marks_member_ignored() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;

    assert!(
        harness
            .session
            .on_external_mute_changed(&alice, false, true)
            .await
    );
    let snapshot = harness.session.snapshot().await;
    let entry = snapshot.entry(alice.member_id).expect("alice");
    assert!(entry.ignored);
    assert!(entry.server_muted);

    harness.session.set_global_mute(true).await;
    harness.session.set_global_mute(false).await;
    assert!(harness.gateway.mute_calls().await.is_empty());
}

#[tokio::test]
async fn echo_of_own_mute_is_not_an_external_change() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    harness.session.set_global_mute(true).await;

    assert!(
        !harness
            .session
            .on_external_mute_changed(&alice, false, true)
            .await
    );
    assert!(
        !harness
            .session
            .snapshot()
            .await
            .entry(alice.member_id)
            .expect("alice")
            .ignored
    );
}

#[tokio::test]
async fn delayed_echoes_of_quick_toggles_do_not_ignore_member() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;

    harness.session.toggle_global_mute().await;
    harness.session.toggle_global_mute().await;
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false]
    );

    assert!(
        !harness
            .session
            .on_external_mute_changed(&alice, false, true)
            .await
    );
    assert!(
        !harness
            .session
            .on_external_mute_changed(&alice, true, false)
            .await
    );

    let snapshot = harness.session.snapshot().await;
    let entry = snapshot.entry(alice.member_id).expect("alice");
    assert!(!entry.ignored);
    assert!(!entry.server_muted);

    harness.session.set_global_mute(true).await;
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false, true]
    );
}

#[tokio::test]
async fn resync_with_stale_voice_state_keeps_member_managed() {
    let harness = Harness::new();
    let alice = member(1, "alice");
    harness.gateway.seat(VOICE, alice.clone(), false).await;
    let harness = harness.tracking().await;

    harness.session.set_global_mute(true).await;
    assert!(
        !harness
            .session
            .on_external_mute_changed(&alice, false, true)
            .await
    );

    harness
        .gateway
        .stale_voice_states
        .store(true, std::sync::atomic::Ordering::SeqCst);
    harness.session.resync_roster().await;

    let snapshot = harness.session.snapshot().await;
    let entry = snapshot.entry(alice.member_id).expect("alice");
    assert!(!entry.ignored);
    assert!(!entry.server_muted);
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false]
    );
}

#[tokio::test]
async fn member_gaining_excluded_role_is_untracked_and_roster_resets() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    harness
        .session
        .set_excluded_roles(roles(&[5]))
        .await
        .expect("exclude");
    harness.session.set_global_mute(true).await;

    let spectator = alice.clone().with_roles(vec![RoleId(5)]);
    harness.leave(&spectator, true).await;

    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.roster.is_empty());
    assert!(!snapshot.global_mute);
}

#[tokio::test]
async fn member_gaining_excluded_role_in_channel_is_released() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;
    harness
        .session
        .set_excluded_roles(roles(&[5]))
        .await
        .expect("exclude");
    harness.session.set_global_mute(true).await;

    let spectator = alice.clone().with_roles(vec![RoleId(5)]);
    let muted = VoiceSnapshot::in_channel(VOICE).muted(true);
    harness
        .session
        .on_voice_state_changed(&spectator, muted, muted.deafened(true))
        .await;

    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.entry(alice.member_id).is_none());
    assert_eq!(snapshot.roster.len(), 1);
    assert!(snapshot.global_mute);
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false]
    );
}

#[tokio::test]
async fn relay_must_be_present_and_tracked() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;
    harness.leave(&alice, false).await;

    assert_eq!(
        harness.session.set_relay(Some(MemberId(99))).await,
        Err(SessionError::NotEligible(MemberId(99)))
    );
    assert_eq!(
        harness.session.set_relay(Some(alice.member_id)).await,
        Err(SessionError::NotEligible(alice.member_id))
    );
    assert_eq!(harness.session.relay().await, None);

    harness
        .session
        .set_relay(Some(bob.member_id))
        .await
        .expect("bob is present");
    assert_eq!(harness.session.relay().await, Some(bob.member_id));
    assert_eq!(
        harness.session.snapshot().await.relay,
        Some(bob.clone())
    );

    harness.session.set_relay(None).await.expect("clear");
    assert_eq!(harness.session.relay().await, None);
}

#[tokio::test]
async fn out_of_range_toggles_are_skipped() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    let before = harness.session.snapshot().await;

    let report = harness
        .session
        .apply_toggles(&[
            IndexToggle::Life(0),
            IndexToggle::Life(2),
            IndexToggle::Ignore(usize::MAX),
        ])
        .await;

    assert_eq!(report.issued, 0);
    assert_eq!(harness.session.snapshot().await, before);
}

#[tokio::test]
async fn life_toggle_is_ignored_for_ignored_members() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    harness.session.toggle_ignored(1).await;

    harness.session.toggle_life_state(1).await;

    let snapshot = harness.session.snapshot().await;
    assert_eq!(snapshot.roster[0].life, LifeState::Alive);
    assert!(snapshot.roster[0].ignored);
    assert!(harness.gateway.mute_calls().await.is_empty());
}

#[tokio::test]
async fn toggle_batch_resolves_every_index_then_reconciles_once() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;

    let report = harness
        .session
        .apply_toggles(&[IndexToggle::Life(2), IndexToggle::Ignore(1)])
        .await;

    assert_eq!(report.issued, 1);
    let snapshot = harness.session.snapshot().await;
    assert!(snapshot.roster[0].ignored);
    assert_eq!(snapshot.roster[1].life, LifeState::Dead);
    assert_eq!(harness.gateway.mute_calls().await, vec![(bob.member_id, true)]);
}

#[tokio::test]
async fn failed_mutes_are_reported_and_retried_later() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;
    harness.gateway.fail_member(alice.member_id, true).await;

    let report = harness.session.set_global_mute(true).await;
    assert_eq!(report.issued, 1);
    assert_eq!(report.failed_members(), vec![alice.member_id]);
    assert!(harness.session.global_mute().await);

    harness.gateway.fail_member(alice.member_id, false).await;
    let report = harness.session.set_global_mute(true).await;
    assert!(report.is_clean());
    assert_eq!(report.issued, 1);
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true]
    );
}

#[tokio::test]
async fn persistence_failure_keeps_in_memory_state() {
    let harness = Harness::new();
    harness.store.set_fail_saves(true);

    harness
        .session
        .set_text_channel(TEXT)
        .await
        .expect("text channel");

    assert_eq!(harness.session.snapshot().await.text_channel, Some(TEXT));
    assert_eq!(harness.store.save_count(), 0);
}

#[tokio::test]
async fn reset_round_revives_everyone_and_unmutes() {
    let harness = Harness::new().tracking().await;
    let alice = member(1, "alice");
    harness.join(&alice, false).await;
    harness.session.toggle_life_state(1).await;
    harness.session.set_global_mute(true).await;

    harness.session.reset_round().await;

    let snapshot = harness.session.snapshot().await;
    assert!(!snapshot.global_mute);
    assert_eq!(snapshot.roster[0].life, LifeState::Alive);
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, false]
    );
}

#[tokio::test]
async fn rejoining_dead_member_is_muted_again() {
    let harness = Harness::new().tracking().await;
    let (alice, bob) = (member(1, "alice"), member(2, "bob"));
    harness.join(&alice, false).await;
    harness.join(&bob, false).await;
    harness.session.toggle_life_state(1).await;
    harness.leave(&alice, true).await;

    // Unmuted by a moderator while away.
    harness.join(&alice, false).await;

    let snapshot = harness.session.snapshot().await;
    let entry = snapshot.entry(alice.member_id).expect("alice");
    assert_eq!(entry.index, 1);
    assert_eq!(entry.presence, Presence::Present);
    assert_eq!(entry.life, LifeState::Dead);
    assert!(entry.server_muted);
    assert_eq!(
        harness.gateway.mute_calls_for(alice.member_id).await,
        vec![true, true]
    );
}

#[tokio::test]
async fn configuration_changes_are_persisted() {
    let harness = Harness::new().tracking().await;

    let saved = harness
        .store
        .load_config(GUILD)
        .await
        .expect("load")
        .expect("saved");
    assert_eq!(saved.text, Some(TEXT));
    assert_eq!(saved.voice, Some(VOICE));
    assert_eq!(saved.control, None);
}
