use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::Result;

/// Envelope schema version stamped on every published message.
///
/// Consumers reject anything else — no best-effort parsing of unknown
/// versions.
pub const SCHEMA_VERSION: u32 = 1;

/// Topic names are fixed contracts between the core and its collaborators.
pub mod topics {
    /// Raw price quotes from data providers.
    pub const PRICES_RAW: &str = "prices.raw";
    /// Raw news items.
    pub const NEWS_RAW: &str = "news.raw";
    /// Processed sentiment scores (collaborator output).
    pub const SENTIMENT: &str = "sentiment.scores";
    /// Processed technical indicators (collaborator output).
    pub const INDICATORS: &str = "indicators.values";
    /// Analysis decisions the execution gate acts on.
    pub const SIGNALS: &str = "signals.analysis";
    /// Portfolio state snapshots.
    pub const PORTFOLIO: &str = "portfolio.state";

    pub const ALL: &[&str] = &[
        PRICES_RAW, NEWS_RAW, SENTIMENT, INDICATORS, SIGNALS, PORTFOLIO,
    ];
}

/// Versioned, timestamped wrapper around every message on the bus.
///
/// `ts` is origin time (when the data was produced), not bus time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub ts: DateTime<Utc>,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload for publication, stamped with the current schema
    /// version and origin timestamp.
    pub fn new<T: Serialize>(
        topic: &str,
        ts: DateTime<Utc>,
        provenance: Option<&str>,
        payload: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_value(payload).map_err(|e| CoreError::Payload {
            topic: topic.to_string(),
            source: e,
        })?;
        Ok(Self {
            topic: topic.to_string(),
            ts,
            version: SCHEMA_VERSION,
            provenance: provenance.map(str::to_string),
            payload,
        })
    }

    /// Decode the payload, rejecting unrecognized schema versions.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        if self.version != SCHEMA_VERSION {
            return Err(CoreError::UnknownVersion {
                topic: self.topic.clone(),
                version: self.version,
            });
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| CoreError::Payload {
            topic: self.topic.clone(),
            source: e,
        })
    }
}

/// Price quote for one symbol at one instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub source: String,
}

/// Raw news item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub ts: DateTime<Utc>,
    pub headline: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
    Standby,
}

/// Analysis decision emitted by the (out-of-core) analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSignal {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub score: f64,
    pub recommendation: Recommendation,
    pub position_size_pct: f64,
    pub confidence_pct: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order forwarded to the broker collaborator. Sized either by share
/// quantity or by notional dollars (exactly one should be set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub side: OrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notional: Option<f64>,
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

/// Why the gate refused to act on a signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    MarketClosed,
    AfterOpenBlackout,
    BeforeCloseBlackout,
    DailyTradeLimit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GateOutcome {
    Allowed,
    Blocked(BlockReason),
}

/// Immutable record of one gate evaluation. Logged, never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub id: Uuid,
    pub symbol: String,
    pub action: Recommendation,
    pub evaluated_at: DateTime<Utc>,
    pub outcome: GateOutcome,
}

impl GateDecision {
    pub fn new(
        symbol: &str,
        action: Recommendation,
        evaluated_at: DateTime<Utc>,
        outcome: GateOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            action,
            evaluated_at,
            outcome,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == GateOutcome::Allowed
    }
}
