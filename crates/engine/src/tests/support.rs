use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gateway::{VoiceGateway, VoiceOccupant};
use shared::domain::{ChannelId, GuildId, MemberId, MemberInfo, MessageId, VoiceSnapshot};
use storage::MemoryConfigStore;
use tokio::sync::Mutex;

use crate::session::{Session, SessionSettings};

pub const GUILD: GuildId = GuildId(1);
pub const TEXT: ChannelId = ChannelId(10);
pub const VOICE: ChannelId = ChannelId(20);
pub const LOBBY: ChannelId = ChannelId(30);

pub fn member(id: u64, name: &str) -> MemberInfo {
    MemberInfo::new(MemberId(id), name)
}

/// Records every gateway call and serves voice occupants from a table.
#[derive(Default)]
pub struct FakeGateway {
    pub mute_calls: Mutex<Vec<(MemberId, bool)>>,
    pub failing_members: Mutex<BTreeSet<MemberId>>,
    pub occupants: Mutex<HashMap<ChannelId, Vec<VoiceOccupant>>>,
    pub sent: Mutex<Vec<(ChannelId, MessageId, String)>>,
    pub edits: Mutex<Vec<(MessageId, String)>>,
    pub deleted: Mutex<Vec<MessageId>>,
    pub reactions: Mutex<Vec<(MessageId, String)>>,
    pub removed_reactions: Mutex<Vec<(MessageId, MemberId, String)>>,
    pub fail_edits: AtomicBool,
    /// When set, mute calls no longer update the served voice states.
    pub stale_voice_states: AtomicBool,
    next_message_id: AtomicU64,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_message_id: AtomicU64::new(1_000),
            ..Self::default()
        })
    }

    pub async fn seat(&self, channel_id: ChannelId, member: MemberInfo, server_mute: bool) {
        let voice = VoiceSnapshot::in_channel(channel_id).muted(server_mute);
        self.occupants
            .lock()
            .await
            .entry(channel_id)
            .or_default()
            .push(VoiceOccupant { member, voice });
    }

    pub async fn fail_member(&self, member_id: MemberId, fail: bool) {
        let mut failing = self.failing_members.lock().await;
        if fail {
            failing.insert(member_id);
        } else {
            failing.remove(&member_id);
        }
    }

    pub async fn mute_calls(&self) -> Vec<(MemberId, bool)> {
        self.mute_calls.lock().await.clone()
    }

    pub async fn mute_calls_for(&self, member_id: MemberId) -> Vec<bool> {
        self.mute_calls
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == member_id)
            .map(|(_, mute)| *mute)
            .collect()
    }

    pub async fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    pub async fn last_edit(&self) -> Option<String> {
        self.edits.lock().await.last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn set_member_mute(
        &self,
        _guild_id: GuildId,
        member_id: MemberId,
        mute: bool,
    ) -> Result<()> {
        if self.failing_members.lock().await.contains(&member_id) {
            return Err(anyhow!("missing permission to mute {member_id}"));
        }
        self.mute_calls.lock().await.push((member_id, mute));
        if self.stale_voice_states.load(Ordering::SeqCst) {
            return Ok(());
        }
        for occupants in self.occupants.lock().await.values_mut() {
            for occupant in occupants
                .iter_mut()
                .filter(|occupant| occupant.member.member_id == member_id)
            {
                occupant.voice.server_mute = mute;
            }
        }
        Ok(())
    }

    async fn voice_occupants(
        &self,
        _guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Vec<VoiceOccupant>> {
        Ok(self
            .occupants
            .lock()
            .await
            .get(&channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<MessageId> {
        let message_id = MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst));
        self.sent
            .lock()
            .await
            .push((channel_id, message_id, content.to_string()));
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        _channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(anyhow!("unknown message {message_id}"));
        }
        self.edits
            .lock()
            .await
            .push((message_id, content.to_string()));
        Ok(())
    }

    async fn delete_message(&self, _channel_id: ChannelId, message_id: MessageId) -> Result<()> {
        self.deleted.lock().await.push(message_id);
        Ok(())
    }

    async fn add_reaction(
        &self,
        _channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<()> {
        self.reactions
            .lock()
            .await
            .push((message_id, emoji.to_string()));
        Ok(())
    }

    async fn remove_reaction(
        &self,
        _channel_id: ChannelId,
        message_id: MessageId,
        member_id: MemberId,
        emoji: &str,
    ) -> Result<()> {
        self.removed_reactions
            .lock()
            .await
            .push((message_id, member_id, emoji.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<MemoryConfigStore>,
    pub session: Session,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let gateway = FakeGateway::new();
        let store = Arc::new(MemoryConfigStore::new());
        let session = Session::new(GUILD, gateway.clone(), store.clone(), settings);
        Self {
            gateway,
            store,
            session,
        }
    }

    /// Sets both channels so tracking is active, with whoever is seated in
    /// the voice channel already tracked.
    pub async fn tracking(self) -> Self {
        self.session
            .set_text_channel(TEXT)
            .await
            .expect("text channel");
        self.session
            .set_voice_channel(Some(VOICE))
            .await
            .expect("voice channel");
        self
    }

    pub async fn join(&self, member: &MemberInfo, server_mute: bool) {
        self.session
            .on_voice_state_changed(
                member,
                VoiceSnapshot::default(),
                VoiceSnapshot::in_channel(VOICE).muted(server_mute),
            )
            .await;
    }

    pub async fn leave(&self, member: &MemberInfo, server_mute: bool) {
        self.session
            .on_voice_state_changed(
                member,
                VoiceSnapshot::in_channel(VOICE).muted(server_mute),
                VoiceSnapshot::default(),
            )
            .await;
    }
}
