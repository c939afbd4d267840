use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::error::CoreError;
use crate::models::Envelope;
use crate::Result;

/// Capacity per topic channel. A subscriber that falls further behind than
/// this loses the oldest messages (logged and skipped, publishers never
/// block).
const TOPIC_CAPACITY: usize = 1024;

/// In-process bus backed by one broadcast channel per topic.
///
/// No retention: subscribers see only envelopes published after
/// subscription start.
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Envelope>>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Envelope> {
        if let Some(tx) = self.topics.read().expect("bus lock poisoned").get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().expect("bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    pub fn publish(&self, envelope: &Envelope) -> Result<()> {
        // A send error just means nobody is subscribed yet; fire-and-forget
        // semantics make that a successful publish.
        let _ = self.sender(&envelope.topic).send(envelope.clone());
        Ok(())
    }

    pub fn subscribe(&self, topic: &str) -> MemorySubscription {
        MemorySubscription {
            topic: topic.to_string(),
            rx: self.sender(topic).subscribe(),
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemorySubscription {
    topic: String,
    rx: broadcast::Receiver<Envelope>,
}

impl MemorySubscription {
    pub async fn recv(&mut self) -> Result<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Ok(envelope),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(
                        topic = %self.topic,
                        missed,
                        "subscriber lagged, skipping missed envelopes"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CoreError::BusUnavailable(format!(
                        "topic {} closed",
                        self.topic
                    )));
                }
            }
        }
    }
}
