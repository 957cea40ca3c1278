// src/channel.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Delay between consecutive replies of one turn, so multi-message bursts
/// read as sequential. Pacing, not a correctness requirement.
pub const DEFAULT_PACING_STEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// The one capability the engine needs from a channel adapter: deliver a
/// text reply into a conversation. Adapters own retries and failures; the
/// engine never rolls back a state transition because a send failed.
#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Fire-and-forget delivery of one turn's replies, in array order, with
/// `step` between consecutive sends. Failures are logged and dropped.
pub fn deliver_paced(
    sender: Arc<dyn ReplySender>,
    conversation_id: &str,
    texts: Vec<String>,
    step: Duration,
) {
    let conversation_id = conversation_id.to_string();
    tokio::spawn(async move {
        for (index, text) in texts.into_iter().enumerate() {
            if index > 0 && !step.is_zero() {
                sleep(step).await;
            }
            if let Err(err) = sender.send(&conversation_id, &text).await {
                warn!(conversation_id = %conversation_id, "reply delivery failed: {err}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, Duration)>>,
        started: Option<Instant>,
        fail: bool,
    }

    #[async_trait]
    impl ReplySender for RecordingSender {
        async fn send(&self, _conversation_id: &str, text: &str) -> Result<(), ChannelError> {
            if self.fail {
                return Err(ChannelError::SendFailed("down".to_string()));
            }
            let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
            self.sent.lock().await.push((text.to_string(), elapsed));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_are_paced_in_order() {
        let sender = Arc::new(RecordingSender {
            started: Some(Instant::now()),
            ..Default::default()
        });
        deliver_paced(
            sender.clone(),
            "chat-1",
            vec!["one".into(), "two".into(), "three".into()],
            Duration::from_secs(1),
        );

        // the paused clock auto-advances through the pacing sleeps
        sleep(Duration::from_secs(5)).await;

        let sent = sender.sent.lock().await;
        let texts: Vec<&str> = sent.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(sent[0].1 < Duration::from_secs(1));
        assert!(sent[1].1 >= Duration::from_secs(1));
        assert!(sent[2].1 >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_is_swallowed() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        deliver_paced(sender.clone(), "chat-1", vec!["one".into()], Duration::ZERO);
        sleep(Duration::from_millis(10)).await;
        assert!(sender.sent.lock().await.is_empty());
    }
}
