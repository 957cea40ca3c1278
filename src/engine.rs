// src/engine.rs

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bot::BotDefinition;
use crate::channel::{DEFAULT_PACING_STEP, ReplySender, deliver_paced};
use crate::graph::{ChildMode, NodeKind};
use crate::matcher::{RESET_KEYWORD, match_trigger};
use crate::session::{ActiveSession, SessionStore};
use crate::storage::{SessionStorage, StorageError};
use crate::sweeper::{EXPIRY_NOTICE, ExpiryScheduler};

pub const RESET_REPLY: &str = "Conversation reset.";
pub const UNMATCHED_PREFIX: &str = "Sorry, I didn't understand that. The options are:";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bot `{0}` not found")]
    BotNotFound(String),
    #[error("no active session for conversation `{0}`")]
    SessionNotFound(String),
    #[error("conversation `{0}` already has an active session")]
    SessionExists(String),
    #[error("bot `{0}` has an empty flow")]
    EmptyFlow(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Definition(#[from] crate::bot::DefinitionError),
}

/// What one incoming message produced: the ordered outgoing replies and
/// whether the session is closed afterwards. Delivery happens elsewhere, so
/// the state transition never depends on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub replies: Vec<String>,
    pub closed: bool,
}

/// Drives the scripted conversations of one bot: resolves, creates,
/// advances and closes sessions as channel events arrive. Events for the
/// same conversation are serialized through a per-conversation mutex;
/// different conversations proceed in parallel.
pub struct ConversationEngine {
    definition: BotDefinition,
    store: SessionStore,
    scheduler: Arc<ExpiryScheduler>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    pacing: Duration,
    // handed to the scheduler so pending expiries never keep a removed
    // bot's engine alive
    weak_self: Weak<ConversationEngine>,
}

impl ConversationEngine {
    pub async fn new(
        definition: BotDefinition,
        storage: Arc<dyn SessionStorage>,
        scheduler: Arc<ExpiryScheduler>,
    ) -> Result<Arc<Self>, EngineError> {
        Self::with_pacing(definition, storage, scheduler, DEFAULT_PACING_STEP).await
    }

    pub async fn with_pacing(
        definition: BotDefinition,
        storage: Arc<dyn SessionStorage>,
        scheduler: Arc<ExpiryScheduler>,
        pacing: Duration,
    ) -> Result<Arc<Self>, EngineError> {
        let definition = definition.build();
        let store = SessionStore::new(definition.id.clone(), storage);
        store.hydrate().await?;
        Ok(Arc::new_cyclic(|weak| Self {
            definition,
            store,
            scheduler,
            locks: DashMap::new(),
            pacing,
            weak_self: weak.clone(),
        }))
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn definition(&self) -> &BotDefinition {
        &self.definition
    }

    pub fn listens_on(&self, channel: &str) -> bool {
        self.definition.listens_on(channel)
    }

    /// How many sessions this bot ever started.
    pub fn triggered(&self) -> u64 {
        self.store.triggered()
    }

    pub async fn sessions(&self) -> Vec<ActiveSession> {
        self.store.sessions().await
    }

    pub async fn get_active_session(&self, conversation_id: &str) -> Option<ActiveSession> {
        self.store.get(conversation_id).await
    }

    pub async fn has_active_session(&self, conversation_id: &str) -> bool {
        self.get_active_session(conversation_id).await.is_some()
    }

    /// Entry point from a channel adapter. Returns the turn that was taken,
    /// or `None` when the message was ignored (no session and no trigger
    /// match, or another bot owns the conversation).
    pub async fn handle_incoming(
        &self,
        message: &str,
        conversation_id: &str,
        sender: Arc<dyn ReplySender>,
        siblings: &[Arc<ConversationEngine>],
    ) -> Option<Turn> {
        for other in siblings {
            if std::ptr::eq(Arc::as_ptr(other), self) {
                continue;
            }
            if other.has_active_session(conversation_id).await {
                debug!(
                    bot = %self.definition.id,
                    owner = %other.definition.id,
                    conversation_id,
                    "conversation owned by another bot"
                );
                return None;
            }
        }

        let now = Utc::now();
        let lock = self.conversation_lock(conversation_id);
        let turn = {
            let _guard = lock.lock().await;
            self.take_turn(message, conversation_id, now).await
        };

        if let Some(turn) = &turn {
            if !turn.replies.is_empty() {
                deliver_paced(
                    sender.clone(),
                    conversation_id,
                    turn.replies.clone(),
                    self.pacing,
                );
                if !turn.closed {
                    self.scheduler.arm(
                        conversation_id,
                        now + self.definition.expiry(),
                        sender,
                        self.weak_self.clone(),
                    );
                }
            }
        }
        turn
    }

    /// Start a session without a trigger, for administration.
    pub async fn new_session(&self, conversation_id: &str) -> Result<ActiveSession, EngineError> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        if self.store.get(conversation_id).await.is_some() {
            return Err(EngineError::SessionExists(conversation_id.to_string()));
        }
        let root = self
            .definition
            .flow
            .root()
            .ok_or_else(|| EngineError::EmptyFlow(self.definition.id.clone()))?;
        let session = ActiveSession::new(conversation_id, root.id.clone(), Utc::now());
        self.store.create(session.clone()).await?;
        Ok(session)
    }

    pub async fn close_session(&self, conversation_id: &str) -> Result<ActiveSession, EngineError> {
        let lock = self.conversation_lock(conversation_id);
        let _guard = lock.lock().await;

        self.scheduler.cancel(conversation_id);
        match self.store.remove(conversation_id).await? {
            Some(session) => Ok(session),
            None => Err(EngineError::SessionNotFound(conversation_id.to_string())),
        }
    }

    /// Close an idle conversation on behalf of the sweeper. Takes the same
    /// per-conversation lock as message handling, so a reply racing this
    /// close cannot half-win: whoever locks first decides, the other
    /// observes the result and backs off. Returns whether the session was
    /// closed here.
    pub(crate) async fn expire(&self, conversation_id: &str, sender: Arc<dyn ReplySender>) -> bool {
        let lock = self.conversation_lock(conversation_id);
        let expired = {
            let _guard = lock.lock().await;
            if self.scheduler.is_armed(conversation_id) {
                // a reply re-armed the conversation after this deadline was claimed
                false
            } else {
                match self.store.remove(conversation_id).await {
                    Ok(removed) => removed.is_some(),
                    Err(err) => {
                        warn!(
                            bot = %self.definition.id,
                            conversation_id,
                            "failed to persist expired-session removal: {err}"
                        );
                        true
                    }
                }
            }
        };
        if expired {
            info!(bot = %self.definition.id, conversation_id, "conversation expired");
            deliver_paced(
                sender,
                conversation_id,
                vec![EXPIRY_NOTICE.to_string()],
                Duration::ZERO,
            );
        }
        expired
    }

    fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The state transition for one incoming message. Caller holds the
    /// conversation lock; no channel I/O happens in here.
    async fn take_turn(
        &self,
        message: &str,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Option<Turn> {
        let threshold = self.definition.fuzzy_threshold;
        let graph = &self.definition.flow;
        let mut fresh = false;

        let session = match self.store.get(conversation_id).await {
            Some(existing) => Some(existing),
            None => {
                if match_trigger(message, &self.definition.trigger, threshold).is_none() {
                    None
                } else if let Some(root) = graph.root() {
                    fresh = true;
                    let session = ActiveSession::new(conversation_id, root.id.clone(), now);
                    if let Err(err) = self.store.create(session.clone()).await {
                        warn!(
                            bot = %self.definition.id,
                            conversation_id,
                            "failed to persist new session: {err}"
                        );
                    }
                    info!(bot = %self.definition.id, conversation_id, "session started");
                    Some(session)
                } else {
                    warn!(
                        bot = %self.definition.id,
                        conversation_id,
                        "trigger matched but the flow has no entry node"
                    );
                    None
                }
            }
        };
        let mut session = session?;

        if match_trigger(message, RESET_KEYWORD, threshold).is_some() {
            self.close(conversation_id).await;
            info!(bot = %self.definition.id, conversation_id, "conversation reset");
            return Some(Turn {
                replies: vec![RESET_REPLY.to_string()],
                closed: true,
            });
        }

        let Some(current) = graph.node(&session.current_node_id) else {
            // the flow was edited underneath this session
            debug!(
                bot = %self.definition.id,
                conversation_id,
                node = %session.current_node_id,
                "session points at a node no longer in the flow; closing"
            );
            self.close(conversation_id).await;
            return Some(Turn {
                replies: Vec::new(),
                closed: true,
            });
        };

        let at_root = graph
            .root()
            .is_some_and(|root| root.id == session.current_node_id);
        let answered = if fresh || at_root {
            Some(current)
        } else {
            graph
                .children(&session.current_node_id, ChildMode::Direct)
                .into_iter()
                .find(|child| {
                    child.kind == NodeKind::Response
                        && match_trigger(message, &child.text, threshold).is_some()
                })
        };

        let Some(answered) = answered else {
            let options: Vec<String> = graph
                .children(&session.current_node_id, ChildMode::Direct)
                .into_iter()
                .map(|child| child.text.clone())
                .collect();
            return Some(Turn {
                replies: vec![format!("{}\n* {}", UNMATCHED_PREFIX, options.join("\n* "))],
                closed: false,
            });
        };

        let mut replies = Vec::new();
        if fresh && answered.kind == NodeKind::Message {
            replies.push(answered.text.clone());
            session.touch(now);
        }

        let mut cursor_id = answered.id.clone();
        let closed = loop {
            match graph.next(&cursor_id) {
                None => break true,
                Some(next) if next.kind == NodeKind::Response => break false,
                Some(next) => {
                    session.current_node_id = next.id.clone();
                    session.touch(now);
                    replies.push(next.text.clone());
                    cursor_id = next.id.clone();
                }
            }
        };

        if closed {
            self.close(conversation_id).await;
            info!(bot = %self.definition.id, conversation_id, "conversation finished");
        } else if let Err(err) = self.store.update(&session).await {
            warn!(
                bot = %self.definition.id,
                conversation_id,
                "failed to persist session: {err}"
            );
        }

        Some(Turn { replies, closed })
    }

    /// Remove the session and its pending expiry together. Caller holds the
    /// conversation lock.
    async fn close(&self, conversation_id: &str) {
        self.scheduler.cancel(conversation_id);
        if let Err(err) = self.store.remove(conversation_id).await {
            warn!(
                bot = %self.definition.id,
                conversation_id,
                "failed to persist session removal: {err}"
            );
        }
    }
}
