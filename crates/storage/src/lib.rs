use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use shared::domain::{ChannelId, GuildId, MessageId, RoleId};
use tokio::sync::Mutex;
use tracing::debug;

/// The scalar configuration of one session. The roster is never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub text: Option<ChannelId>,
    #[serde(default)]
    pub voice: Option<ChannelId>,
    /// Message id of the status panel.
    #[serde(default)]
    pub control: Option<MessageId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub exclude: Vec<RoleId>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RoleId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RoleId>>::deserialize(deserializer)?.unwrap_or_default())
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_config(&self, guild_id: GuildId) -> Result<Option<SessionConfig>>;
    async fn save_config(&self, guild_id: GuildId, config: &SessionConfig) -> Result<()>;
    /// Returns whether an entry existed.
    async fn remove_config(&self, guild_id: GuildId) -> Result<bool>;
    async fn guild_ids(&self) -> Result<Vec<GuildId>>;
}

/// Parses the persisted document. Blank input means nothing has been saved yet.
pub fn parse_document(raw: &str) -> Result<BTreeMap<GuildId, SessionConfig>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let entries: BTreeMap<String, SessionConfig> =
        serde_json::from_str(raw).context("config document is not valid JSON")?;
    entries
        .into_iter()
        .map(|(key, config)| {
            let guild_id = key
                .parse::<u64>()
                .map(GuildId)
                .map_err(|_| anyhow!("config key '{key}' is not a guild id"))?;
            Ok((guild_id, config))
        })
        .collect()
}

pub fn render_document(entries: &BTreeMap<GuildId, SessionConfig>) -> Result<String> {
    let keyed: BTreeMap<String, &SessionConfig> = entries
        .iter()
        .map(|(guild_id, config)| (guild_id.to_string(), config))
        .collect();
    serde_json::to_string_pretty(&keyed).context("failed to serialize config document")
}

/// All sessions' configuration in one JSON object keyed by guild id.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<GuildId, SessionConfig>>,
}

impl JsonFileStore {
    /// Loads the document at `path`. A missing or empty file starts empty; a
    /// corrupt file is an error so configuration is never silently dropped.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_document(&raw)
                .with_context(|| format!("failed to load config file '{}'", path.display()))?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config file '{}'", path.display()))
            }
        };
        debug!(path = %path.display(), sessions = entries.len(), "config store opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, entries: &BTreeMap<GuildId, SessionConfig>) -> Result<()> {
        ensure_parent_dir_exists(&self.path).await?;
        let document = render_document(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, document)
            .await
            .with_context(|| format!("failed to write '{}'", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "failed to replace '{}' with '{}'",
                    self.path.display(),
                    tmp_path.display()
                )
            })?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load_config(&self, guild_id: GuildId) -> Result<Option<SessionConfig>> {
        Ok(self.entries.lock().await.get(&guild_id).cloned())
    }

    async fn save_config(&self, guild_id: GuildId, config: &SessionConfig) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(guild_id, config.clone());
        self.flush(&entries).await
    }

    async fn remove_config(&self, guild_id: GuildId) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.remove(&guild_id).is_none() {
            return Ok(false);
        }
        self.flush(&entries).await?;
        Ok(true)
    }

    async fn guild_ids(&self) -> Result<Vec<GuildId>> {
        Ok(self.entries.lock().await.keys().copied().collect())
    }
}

async fn ensure_parent_dir_exists(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent).await.with_context(|| {
        format!(
            "failed to create parent directory '{}' for config file '{}'",
            parent.display(),
            path.display()
        )
    })
}

/// Process-local store for tests and dry runs.
#[derive(Default)]
pub struct MemoryConfigStore {
    entries: Mutex<BTreeMap<GuildId, SessionConfig>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (GuildId, SessionConfig)>) -> Self {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Makes every following save fail, to exercise non-fatal persistence errors.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_config(&self, guild_id: GuildId) -> Result<Option<SessionConfig>> {
        Ok(self.entries.lock().await.get(&guild_id).cloned())
    }

    async fn save_config(&self, guild_id: GuildId, config: &SessionConfig) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("config store unavailable"));
        }
        self.entries.lock().await.insert(guild_id, config.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_config(&self, guild_id: GuildId) -> Result<bool> {
        Ok(self.entries.lock().await.remove(&guild_id).is_some())
    }

    async fn guild_ids(&self) -> Result<Vec<GuildId>> {
        Ok(self.entries.lock().await.keys().copied().collect())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
