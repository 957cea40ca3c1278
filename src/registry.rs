// src/registry.rs

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bot::BotDefinition;
use crate::channel::{DEFAULT_PACING_STEP, ReplySender};
use crate::engine::{ConversationEngine, EngineError};
use crate::storage::SessionStorage;
use crate::sweeper::ExpiryScheduler;

/// Holds one `ConversationEngine` per configured bot and fans incoming
/// channel events out to every bot attached to that channel, passing each
/// the sibling list so at most one bot owns a conversation at a time.
pub struct BotRegistry {
    engines: DashMap<String, Arc<ConversationEngine>>,
    scheduler: Arc<ExpiryScheduler>,
    storage: Arc<dyn SessionStorage>,
    pacing: Duration,
}

impl BotRegistry {
    pub fn new(scheduler: Arc<ExpiryScheduler>, storage: Arc<dyn SessionStorage>) -> Arc<Self> {
        Self::with_pacing(scheduler, storage, DEFAULT_PACING_STEP)
    }

    pub fn with_pacing(
        scheduler: Arc<ExpiryScheduler>,
        storage: Arc<dyn SessionStorage>,
        pacing: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            engines: DashMap::new(),
            scheduler,
            storage,
            pacing,
        })
    }

    /// Build an engine for the definition and register it, replacing any
    /// previous engine for the same bot id. Re-registering is how an edited
    /// definition (a wholesale-replaced graph) goes live.
    pub async fn register(
        &self,
        definition: BotDefinition,
    ) -> Result<Arc<ConversationEngine>, EngineError> {
        let id = definition.id.clone();
        let engine = ConversationEngine::with_pacing(
            definition,
            self.storage.clone(),
            self.scheduler.clone(),
            self.pacing,
        )
        .await?;
        self.engines.insert(id.clone(), engine.clone());
        info!("Registered bot: {}", id);
        Ok(engine)
    }

    pub fn remove(&self, bot_id: &str) -> bool {
        let removed = self.engines.remove(bot_id).is_some();
        if removed {
            info!("Removed bot: {}", bot_id);
        }
        removed
    }

    pub fn get(&self, bot_id: &str) -> Option<Arc<ConversationEngine>> {
        self.engines.get(bot_id).map(|entry| entry.value().clone())
    }

    pub fn engine(&self, bot_id: &str) -> Result<Arc<ConversationEngine>, EngineError> {
        self.get(bot_id)
            .ok_or_else(|| EngineError::BotNotFound(bot_id.to_string()))
    }

    pub fn bots(&self) -> Vec<String> {
        self.engines.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Engines attached to a channel, in bot-id order so fan-out is
    /// deterministic.
    pub fn engines_on(&self, channel: &str) -> Vec<Arc<ConversationEngine>> {
        let mut engines: Vec<Arc<ConversationEngine>> = self
            .engines
            .iter()
            .filter(|entry| entry.value().listens_on(channel))
            .map(|entry| entry.value().clone())
            .collect();
        engines.sort_by(|a, b| a.id().cmp(b.id()));
        engines
    }

    /// Entry point for a channel adapter: offer the message to every bot on
    /// the channel. Returns how many bots took a turn.
    pub async fn dispatch(
        &self,
        channel: &str,
        message: &str,
        conversation_id: &str,
        sender: Arc<dyn ReplySender>,
    ) -> usize {
        let engines = self.engines_on(channel);
        let dispatch_id = Uuid::new_v4();
        debug!(
            %dispatch_id,
            channel,
            conversation_id,
            bots = engines.len(),
            "dispatching incoming message"
        );

        let mut turns = 0;
        for engine in &engines {
            if engine
                .handle_incoming(message, conversation_id, sender.clone(), &engines)
                .await
                .is_some()
            {
                turns += 1;
            }
        }
        turns
    }

    /// Load every `*.json` bot definition in a directory; bad files are
    /// logged and skipped. Returns how many bots were registered.
    pub async fn load_dir(&self, dir: &Path) -> anyhow::Result<usize> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        let mut count = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let name = path.file_stem().unwrap_or_default().to_string_lossy();
                match BotDefinition::from_file(&path) {
                    Ok(definition) => match self.register(definition).await {
                        Ok(_) => count += 1,
                        Err(e) => error!("Failed to register {}: {}", name, e),
                    },
                    Err(e) => error!("Failed to load {}: {}", name, e),
                }
            }
        }
        Ok(count)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let count = self.engines.len();
        self.engines.clear();
        info!("Shut down {} bots", count);
    }
}
