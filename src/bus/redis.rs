use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use crate::error::CoreError;
use crate::models::Envelope;
use crate::Result;

/// Approximate per-topic retention when externally backed. Old entries are
/// trimmed by Redis, bounding the replay window on subscriber restart.
const RETENTION_ENTRIES: usize = 10_000;

/// How long one XREAD blocks before re-polling (ms).
const READ_BLOCK_MS: usize = 1_000;

const READ_COUNT: usize = 64;

fn bus_err(e: redis::RedisError) -> CoreError {
    CoreError::BusUnavailable(e.to_string())
}

/// Durable bus backend on Redis Streams.
///
/// One stream per topic; publishes XADD a JSON-encoded envelope, subscribers
/// XREAD from their own connection. Restart replays from the stream tail, so
/// duplicate delivery is possible — consumers de-duplicate by
/// (topic, ts, provenance) when exactness matters.
pub struct RedisBus {
    client: Client,
    publish_conn: ConnectionManager,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(bus_err)?;

        let publish_conn = timeout(Duration::from_secs(5), ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| CoreError::BusUnavailable("redis connection timeout".to_string()))?
            .map_err(bus_err)?;

        tracing::info!(url = %redis_url, "connected to redis bus");

        Ok(Self {
            client,
            publish_conn,
        })
    }

    pub async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_string(envelope).map_err(|e| CoreError::Payload {
            topic: envelope.topic.clone(),
            source: e,
        })?;

        let mut conn = self.publish_conn.clone();
        conn.xadd_maxlen::<_, _, _, _, ()>(
            &envelope.topic,
            StreamMaxlen::Approx(RETENTION_ENTRIES),
            "*",
            &[("data", payload.as_str())],
        )
        .await
        .map_err(bus_err)?;

        Ok(())
    }

    /// Each subscription gets its own connection so a blocking XREAD never
    /// stalls publishes or other subscribers.
    pub async fn subscribe(&self, topic: &str) -> Result<RedisSubscription> {
        let conn = timeout(
            Duration::from_secs(5),
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| CoreError::BusUnavailable("redis connection timeout".to_string()))?
        .map_err(bus_err)?;

        Ok(RedisSubscription {
            conn,
            topic: topic.to_string(),
            // "$" = only envelopes published after subscription start.
            last_id: "$".to_string(),
            pending: Vec::new(),
        })
    }
}

pub struct RedisSubscription {
    conn: ConnectionManager,
    topic: String,
    last_id: String,
    pending: Vec<Envelope>,
}

impl RedisSubscription {
    pub async fn recv(&mut self) -> Result<Envelope> {
        loop {
            if !self.pending.is_empty() {
                return Ok(self.pending.remove(0));
            }

            let opts = StreamReadOptions::default()
                .block(READ_BLOCK_MS)
                .count(READ_COUNT);
            let reply: StreamReadReply = self
                .conn
                .xread_options(&[&self.topic], &[&self.last_id], &opts)
                .await
                .map_err(bus_err)?;

            for key in reply.keys {
                for entry in key.ids {
                    self.last_id = entry.id.clone();
                    let Some(value) = entry.map.get("data") else {
                        tracing::warn!(topic = %self.topic, id = %entry.id, "stream entry without data field");
                        continue;
                    };
                    let raw: String = redis::from_redis_value(value).map_err(bus_err)?;
                    match serde_json::from_str::<Envelope>(&raw) {
                        Ok(envelope) => self.pending.push(envelope),
                        Err(e) => {
                            tracing::warn!(
                                topic = %self.topic,
                                id = %entry.id,
                                error = %e,
                                "dropping undecodable stream entry"
                            );
                        }
                    }
                }
            }
            // Empty reply: XREAD block timed out, poll again.
        }
    }
}
