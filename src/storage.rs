// src/storage.rs

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ActiveSession;

/// The unit of persistence for one bot: the ordered active-session list and
/// the monotonic triggered counter, written after every mutation and read
/// back verbatim on process start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub sessions: Vec<ActiveSession>,
    #[serde(default)]
    pub triggered: u64,
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("JSON error: {0}")]
    Serialization(String),
}

/// Storage capability the engine mirrors its session set through. The
/// in-memory set stays authoritative; a failed save is surfaced to the
/// mutating caller and never rolls back the in-memory state.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn load(&self, bot_id: &str) -> Result<Option<SessionSnapshot>, StorageError>;
    async fn save(&self, bot_id: &str, snapshot: &SessionSnapshot) -> Result<(), StorageError>;

    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn SessionStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStorage")
            .field("impl", &self.name())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    snapshots: DashMap<String, SessionSnapshot>,
}

impl InMemorySessionStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            snapshots: DashMap::new(),
        })
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn load(&self, bot_id: &str) -> Result<Option<SessionSnapshot>, StorageError> {
        Ok(self.snapshots.get(bot_id).map(|entry| entry.clone()))
    }

    async fn save(&self, bot_id: &str, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        self.snapshots.insert(bot_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "InMemorySessionStorage"
    }
}

/// One pretty-printed JSON file per bot under a state directory.
#[derive(Debug)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self { dir: dir.into() })
    }

    fn path(&self, bot_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", bot_id))
    }
}

#[async_trait]
impl SessionStorage for JsonFileStorage {
    async fn load(&self, bot_id: &str) -> Result<Option<SessionSnapshot>, StorageError> {
        let path = self.path(bot_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .map_err(|e| StorageError::Io(format!("read error: {}", e)))?;
        let snapshot = serde_json::from_str(&json)
            .map_err(|e| StorageError::Serialization(format!("parse error: {}", e)))?;
        Ok(Some(snapshot))
    }

    async fn save(&self, bot_id: &str, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::Io(format!("{}", e)))?;
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StorageError::Serialization(format!("{}", e)))?;
        fs::write(self.path(bot_id), json).map_err(|e| StorageError::Io(format!("{}", e)))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "JsonFileStorage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            sessions: vec![ActiveSession::new("chat-1", "start", Utc::now())],
            triggered: 7,
        }
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let storage = InMemorySessionStorage::new();
        assert_eq!(storage.load("b1").await.unwrap(), None);

        storage.save("b1", &snapshot()).await.unwrap();
        let loaded = storage.load("b1").await.unwrap().unwrap();
        assert_eq!(loaded.triggered, 7);
        assert_eq!(loaded.sessions[0].conversation_id, "chat-1");
    }

    #[tokio::test]
    async fn test_json_file_round_trip() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("state"));

        assert_eq!(storage.load("b1").await.unwrap(), None);

        let snap = snapshot();
        storage.save("b1", &snap).await.unwrap();
        let loaded = storage.load("b1").await.unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[tokio::test]
    async fn test_bots_do_not_share_files() {
        let dir = tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path());

        storage.save("b1", &snapshot()).await.unwrap();
        assert_eq!(storage.load("b2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_storage_trait_object_usage() {
        let storage: Arc<dyn SessionStorage> = InMemorySessionStorage::new();
        storage.save("b1", &snapshot()).await.unwrap();
        assert!(storage.load("b1").await.unwrap().is_some());
        assert_eq!(storage.name(), "InMemorySessionStorage");
    }
}
