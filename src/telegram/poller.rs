// Long-poll loop feeding Telegram updates into the dispatcher's event stream.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::core::gateway::GatewayError;
use crate::core::moderation::InboundEvent;
use crate::infra::telegram::{TelegramClient, Update};

/// Pause after a failed poll before asking again.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Anything that can hand out batches of updates after an offset.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn fetch_updates(&self, offset: i64, timeout_secs: u64)
        -> Result<Vec<Update>, GatewayError>;
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn fetch_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, GatewayError> {
        self.get_updates(offset, timeout_secs).await
    }
}

/// Poll until the receiving side of `events` goes away. Updates are forwarded in
/// the order the platform delivered them.
pub async fn poll_updates<U: UpdateSource + ?Sized>(
    source: &U,
    events: mpsc::Sender<InboundEvent>,
    timeout_secs: u64,
) {
    let mut offset = 0;

    while !events.is_closed() {
        let updates = match source.fetch_updates(offset, timeout_secs).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("polling for updates failed: {}", e);
                sleep(POLL_ERROR_PAUSE).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(event) = update.message.and_then(|m| m.into_event()) else {
                continue;
            };
            if events.send(event).await.is_err() {
                tracing::info!("event stream closed, stopping poller");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted batches, then returns empty batches.
    struct ScriptedSource {
        batches: Mutex<VecDeque<Vec<Update>>>,
        offsets: Mutex<Vec<i64>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<Update>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                offsets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch_updates(
            &self,
            offset: i64,
            _timeout_secs: u64,
        ) -> Result<Vec<Update>, GatewayError> {
            self.offsets.lock().unwrap().push(offset);
            let next = self.batches.lock().unwrap().pop_front();
            match next {
                Some(batch) => Ok(batch),
                None => {
                    sleep(Duration::from_millis(5)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn update(update_id: i64, sender: i64) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id * 10,
                "from": {"id": sender, "is_bot": true, "username": "spam_bot"},
                "chat": {"id": -1001, "type": "supergroup", "title": "Rustaceans"}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_poller_forwards_in_order_and_advances_offset() {
        let source = std::sync::Arc::new(ScriptedSource::new(vec![
            vec![update(7, 900), update(8, 901)],
            vec![serde_json::from_value(serde_json::json!({"update_id": 9})).unwrap()],
            vec![update(10, 902)],
        ]));

        let (tx, mut rx) = mpsc::channel(8);
        let poller_source = std::sync::Arc::clone(&source);
        let poller = tokio::spawn(async move { poll_updates(&*poller_source, tx, 0).await });

        let mut senders = Vec::new();
        for _ in 0..3 {
            senders.push(rx.recv().await.unwrap().sender.id);
        }
        assert_eq!(senders, vec![900, 901, 902]);

        drop(rx);
        poller.await.unwrap();

        let offsets = source.offsets.lock().unwrap().clone();
        assert_eq!(&offsets[..3], &[0, 9, 10]);
    }
}
