// src/sweeper.rs

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::channel::ReplySender;
use crate::engine::ConversationEngine;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub const EXPIRY_NOTICE: &str =
    "This conversation has expired. Start over whenever you are ready.";

/// One conversation currently awaiting a reply: when to give up, how to
/// notify the remote party, and which engine owns the session. Never
/// persisted; rebuilt as conversations produce turns.
struct PendingExpiry {
    deadline: DateTime<Utc>,
    sender: Arc<dyn ReplySender>,
    owner: Weak<ConversationEngine>,
}

/// Closes idle conversations. One instance per process, owned by the
/// composition root and injected into every engine; entries are keyed by
/// conversation id, and arming a conversation replaces its previous entry.
pub struct ExpiryScheduler {
    pending: DashMap<String, PendingExpiry>,
    interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryScheduler {
    pub fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            interval,
            ticker: Mutex::new(None),
        })
    }

    /// Schedule (or reschedule) the idle deadline for a conversation.
    pub fn arm(
        &self,
        conversation_id: &str,
        deadline: DateTime<Utc>,
        sender: Arc<dyn ReplySender>,
        owner: Weak<ConversationEngine>,
    ) {
        self.pending.insert(
            conversation_id.to_string(),
            PendingExpiry {
                deadline,
                sender,
                owner,
            },
        );
    }

    /// Drop the pending deadline; called whenever a session closes.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        self.pending.remove(conversation_id).is_some()
    }

    pub fn is_armed(&self, conversation_id: &str) -> bool {
        self.pending.contains_key(conversation_id)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Spawn the periodic tick. Safe to call once; the handle is kept so
    /// `shutdown` can abort it.
    pub fn start(self: Arc<Self>) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.interval);
            loop {
                tick.tick().await;
                scheduler.sweep(Utc::now()).await;
            }
        });
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(previous) = ticker.replace(handle) {
                previous.abort();
            }
        }
    }

    /// One pass over the pending entries: every deadline at or before `now`
    /// is claimed (removed) and its owning session closed with a single
    /// expiry notice. Entries whose engine is gone are discarded. Returns
    /// how many sessions were closed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for conversation_id in due {
            let Some((key, entry)) = self.pending.remove(&conversation_id) else {
                continue;
            };
            // re-armed with a fresh deadline between the scan and the claim
            if entry.deadline > now {
                self.pending.insert(key, entry);
                continue;
            }
            match entry.owner.upgrade() {
                Some(engine) => {
                    if engine.expire(&conversation_id, entry.sender).await {
                        closed += 1;
                    }
                }
                None => {
                    debug!(conversation_id, "dropping expiry for a removed bot");
                }
            }
        }
        closed
    }

    /// Abort the tick and forget every pending deadline.
    pub fn shutdown(&self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            info!("Cancelled {} pending expiries", count);
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}
