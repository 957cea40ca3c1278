// src/session.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::storage::{SessionSnapshot, SessionStorage, StorageError};

/// The live cursor of one ongoing conversation: which node the flow is
/// resting on and when the remote party last interacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActiveSession {
    pub conversation_id: String,
    pub current_node_id: String,
    pub last_interaction: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn new(
        conversation_id: impl Into<String>,
        current_node_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            current_node_id: current_node_id.into(),
            last_interaction: now,
            started_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_interaction = now;
    }
}

/// Active sessions for one bot, in creation order, mirrored through the
/// storage capability after every mutation. Mutating methods that return
/// `Err` have already applied the change in memory; only the mirror write
/// failed.
pub struct SessionStore {
    bot_id: String,
    sessions: RwLock<Vec<ActiveSession>>,
    triggered: AtomicU64,
    storage: Arc<dyn SessionStorage>,
}

impl SessionStore {
    pub fn new(bot_id: impl Into<String>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            bot_id: bot_id.into(),
            sessions: RwLock::new(Vec::new()),
            triggered: AtomicU64::new(0),
            storage,
        }
    }

    /// Reload the persisted snapshot verbatim, replacing the in-memory set.
    pub async fn hydrate(&self) -> Result<(), StorageError> {
        if let Some(snapshot) = self.storage.load(&self.bot_id).await? {
            let count = snapshot.sessions.len();
            *self.sessions.write().await = snapshot.sessions;
            self.triggered.store(snapshot.triggered, Ordering::Relaxed);
            info!(bot = %self.bot_id, sessions = count, "rehydrated session store");
        }
        Ok(())
    }

    pub async fn get(&self, conversation_id: &str) -> Option<ActiveSession> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|s| s.conversation_id == conversation_id)
            .cloned()
    }

    /// Add a new session and count the trigger that started it.
    pub async fn create(&self, session: ActiveSession) -> Result<(), StorageError> {
        self.sessions.write().await.push(session);
        self.triggered.fetch_add(1, Ordering::Relaxed);
        self.persist().await
    }

    /// Replace the stored session for the same conversation.
    pub async fn update(&self, session: &ActiveSession) -> Result<(), StorageError> {
        {
            let mut sessions = self.sessions.write().await;
            match sessions
                .iter_mut()
                .find(|s| s.conversation_id == session.conversation_id)
            {
                Some(slot) => *slot = session.clone(),
                None => sessions.push(session.clone()),
            }
        }
        self.persist().await
    }

    pub async fn remove(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ActiveSession>, StorageError> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let index = sessions
                .iter()
                .position(|s| s.conversation_id == conversation_id);
            index.map(|i| sessions.remove(i))
        };
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn sessions(&self) -> Vec<ActiveSession> {
        self.sessions.read().await.clone()
    }

    pub fn triggered(&self) -> u64 {
        self.triggered.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            sessions: self.sessions.read().await.clone(),
            triggered: self.triggered(),
        }
    }

    async fn persist(&self) -> Result<(), StorageError> {
        let snapshot = self.snapshot().await;
        self.storage.save(&self.bot_id, &snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemorySessionStorage;

    #[tokio::test]
    async fn test_create_get_remove() {
        let storage = InMemorySessionStorage::new();
        let store = SessionStore::new("b1", storage);

        store
            .create(ActiveSession::new("chat-1", "start", Utc::now()))
            .await
            .unwrap();

        let session = store.get("chat-1").await.unwrap();
        assert_eq!(session.current_node_id, "start");
        assert_eq!(store.triggered(), 1);

        let removed = store.remove("chat-1").await.unwrap();
        assert!(removed.is_some());
        assert!(store.get("chat-1").await.is_none());
        // removing twice is a no-op
        assert!(store.remove("chat-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_every_mutation_is_mirrored() {
        let storage = InMemorySessionStorage::new();
        let store = SessionStore::new("b1", storage.clone());

        store
            .create(ActiveSession::new("chat-1", "start", Utc::now()))
            .await
            .unwrap();

        let mirrored = storage.load("b1").await.unwrap().unwrap();
        assert_eq!(mirrored.sessions.len(), 1);
        assert_eq!(mirrored.triggered, 1);

        let mut session = store.get("chat-1").await.unwrap();
        session.current_node_id = "ask".to_string();
        store.update(&session).await.unwrap();

        let mirrored = storage.load("b1").await.unwrap().unwrap();
        assert_eq!(mirrored.sessions[0].current_node_id, "ask");

        store.remove("chat-1").await.unwrap();
        let mirrored = storage.load("b1").await.unwrap().unwrap();
        assert!(mirrored.sessions.is_empty());
        assert_eq!(mirrored.triggered, 1);
    }

    #[tokio::test]
    async fn test_hydrate_restores_snapshot_verbatim() {
        let storage = InMemorySessionStorage::new();
        let first = SessionStore::new("b1", storage.clone());
        first
            .create(ActiveSession::new("chat-1", "ask", Utc::now()))
            .await
            .unwrap();
        first
            .create(ActiveSession::new("chat-2", "start", Utc::now()))
            .await
            .unwrap();

        let second = SessionStore::new("b1", storage);
        second.hydrate().await.unwrap();

        assert_eq!(second.sessions().await, first.sessions().await);
        assert_eq!(second.triggered(), 2);
    }

    #[tokio::test]
    async fn test_sessions_keep_creation_order() {
        let storage = InMemorySessionStorage::new();
        let store = SessionStore::new("b1", storage);
        for id in ["c", "a", "b"] {
            store
                .create(ActiveSession::new(id, "start", Utc::now()))
                .await
                .unwrap();
        }
        let order: Vec<String> = store
            .sessions()
            .await
            .into_iter()
            .map(|s| s.conversation_id)
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
