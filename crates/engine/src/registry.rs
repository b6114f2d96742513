use std::{collections::HashMap, sync::Arc};

use gateway::VoiceGateway;
use shared::{domain::GuildId, protocol::GatewayEvent};
use storage::ConfigStore;
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::session::{Session, SessionSettings};

struct GuildWorker {
    events: mpsc::UnboundedSender<GatewayEvent>,
    task: JoinHandle<()>,
}

/// Owns one [`Session`] per guild and routes events to them.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<GuildId, Arc<Session>>>,
    gateway: Arc<dyn VoiceGateway>,
    store: Arc<dyn ConfigStore>,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        store: Arc<dyn ConfigStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            gateway,
            store,
            settings,
        }
    }

    /// Returns the guild's session, restoring it from persisted configuration
    /// the first time.
    pub async fn create_session(&self, guild_id: GuildId) -> Arc<Session> {
        if let Some(existing) = self.session(guild_id).await {
            return existing;
        }

        let config = match self.store.load_config(guild_id).await {
            Ok(config) => config.unwrap_or_default(),
            Err(error) => {
                warn!(guild = %guild_id, error = %error, "failed to load session config");
                Default::default()
            }
        };
        let session = Session::restore(
            guild_id,
            &config,
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            self.settings.clone(),
        )
        .await;

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(guild_id).or_insert(session))
    }

    /// Drops the guild's session. Its persisted configuration is kept.
    pub async fn remove_session(&self, guild_id: GuildId) -> bool {
        let removed = self.sessions.write().await.remove(&guild_id).is_some();
        if removed {
            info!(guild = %guild_id, "session removed");
        }
        removed
    }

    pub async fn session(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&guild_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn dispatch(&self, event: GatewayEvent) {
        let guild_id = event.guild_id();
        match event {
            GatewayEvent::GuildAvailable { .. } => {
                self.create_session(guild_id).await;
            }
            GatewayEvent::GuildRemoved { .. } => {
                self.remove_session(guild_id).await;
            }
            event => {
                let Some(session) = self.session(guild_id).await else {
                    debug!(guild = %guild_id, "event for guild without session dropped");
                    return;
                };
                if let Err(error) = session.handle_event(&event).await {
                    warn!(guild = %guild_id, error = %error, "event handling failed");
                }
            }
        }
    }

    /// Consumes the shared event stream until it closes. Each guild gets its
    /// own worker so its events are handled in arrival order while guilds
    /// proceed in parallel.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<GatewayEvent>) {
        let mut router = GuildRouter::new(self);
        while let Some(event) = events.recv().await {
            router.route(event);
        }
        router.drain().await;
    }
}

/// Per-guild ordered workers behind [`SessionRegistry::run`].
pub(crate) struct GuildRouter {
    registry: Arc<SessionRegistry>,
    workers: HashMap<GuildId, GuildWorker>,
    /// Workers of removed guilds still finishing their queue. A worker
    /// spawned later for the same guild waits for its predecessor.
    retiring: HashMap<GuildId, JoinHandle<()>>,
}

impl GuildRouter {
    pub(crate) fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            workers: HashMap::new(),
            retiring: HashMap::new(),
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn route(&mut self, event: GatewayEvent) {
        let guild_id = event.guild_id();
        let removes_guild = matches!(event, GatewayEvent::GuildRemoved { .. });
        self.retiring.retain(|_, task| !task.is_finished());

        if !self.workers.contains_key(&guild_id) {
            let worker = self.spawn_worker(guild_id);
            self.workers.insert(guild_id, worker);
        }
        let delivered = match self.workers.get(&guild_id) {
            Some(worker) => worker.events.send(event),
            None => return,
        };
        if let Err(mpsc::error::SendError(event)) = delivered {
            warn!(guild = %guild_id, "guild worker stopped, restarting");
            let replacement = self.spawn_worker(guild_id);
            if replacement.events.send(event).is_err() {
                warn!(guild = %guild_id, "event dropped");
            }
            self.workers.insert(guild_id, replacement);
        }

        if removes_guild {
            if let Some(worker) = self.workers.remove(&guild_id) {
                debug!(guild = %guild_id, "guild removed, retiring its worker");
                self.retiring.insert(guild_id, worker.task);
            }
        }
    }

    pub(crate) async fn drain(self) {
        debug!(
            workers = self.workers.len(),
            retiring = self.retiring.len(),
            "event stream closed, draining guild workers"
        );
        let workers = self
            .workers
            .into_iter()
            .map(|(guild_id, worker)| {
                drop(worker.events);
                (guild_id, worker.task)
            })
            .chain(self.retiring);
        for (guild_id, task) in workers {
            if let Err(error) = task.await {
                warn!(guild = %guild_id, error = %error, "guild worker failed");
            }
        }
    }

    fn spawn_worker(&mut self, guild_id: GuildId) -> GuildWorker {
        let (events, mut rx) = mpsc::unbounded_channel();
        let registry = Arc::clone(&self.registry);
        let predecessor = self.retiring.remove(&guild_id);
        let task = tokio::spawn(async move {
            if let Some(predecessor) = predecessor {
                if let Err(error) = predecessor.await {
                    warn!(guild = %guild_id, error = %error, "previous guild worker failed");
                }
            }
            while let Some(event) = rx.recv().await {
                registry.dispatch(event).await;
            }
            debug!(guild = %guild_id, "guild worker finished");
        });
        GuildWorker { events, task }
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
