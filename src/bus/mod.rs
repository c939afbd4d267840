// Topic bus: named, independently-ordered publish/subscribe channels with
// pluggable backing (in-process broadcast vs Redis Streams).
pub mod memory;
pub mod redis;

use crate::models::Envelope;
use crate::Result;

pub use memory::InMemoryBus;
pub use redis::RedisBus;

/// Publish/subscribe fabric shared by the orchestrator, the gate, and the
/// out-of-core analysis collaborators.
///
/// Contract (identical across backends): per-topic, per-publisher FIFO
/// delivery; at-least-once to every subscriber active at publish time; no
/// cross-topic ordering. The in-process backend retains nothing —
/// subscribers only see envelopes published after they subscribed. The
/// Redis backend retains a bounded window and is restartable, so consumers
/// that care about exactness de-duplicate by (topic, ts, provenance).
pub enum Bus {
    InMemory(InMemoryBus),
    Redis(RedisBus),
}

impl Bus {
    pub fn in_memory() -> Self {
        Self::InMemory(InMemoryBus::new())
    }

    pub async fn redis(url: &str) -> Result<Self> {
        Ok(Self::Redis(RedisBus::connect(url).await?))
    }

    /// Fire-and-forget publish; returns once the envelope is durably queued
    /// in the backend. A failure affects this call only.
    pub async fn publish(&self, envelope: &Envelope) -> Result<()> {
        match self {
            Self::InMemory(bus) => bus.publish(envelope),
            Self::Redis(bus) => bus.publish(envelope).await,
        }
    }

    pub async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        match self {
            Self::InMemory(bus) => Ok(Subscription::InMemory(bus.subscribe(topic))),
            Self::Redis(bus) => Ok(Subscription::Redis(bus.subscribe(topic).await?)),
        }
    }
}

/// Infinite sequence of envelopes for one topic.
pub enum Subscription {
    InMemory(memory::MemorySubscription),
    Redis(redis::RedisSubscription),
}

impl Subscription {
    /// Blocking receive of the next envelope on the topic.
    pub async fn recv(&mut self) -> Result<Envelope> {
        match self {
            Self::InMemory(sub) => sub.recv().await,
            Self::Redis(sub) => sub.recv().await,
        }
    }
}
