use std::time::Duration;

use thiserror::Error;

/// Core error taxonomy.
///
/// Recoverable classes (`QuotaExceeded`, `TransientProvider`) are handled
/// locally by the retry policy and never escalate past the orchestrator or
/// gate. Fatal classes are terminal for the current cycle only — one
/// provider's exhaustion never stops ingestion for other providers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("quota exhausted for {provider}, next token in {wait:?}")]
    QuotaExceeded { provider: String, wait: Duration },

    #[error("transient provider error ({provider}): {message}")]
    TransientProvider { provider: String, message: String },

    #[error("fatal provider error ({provider}): {message}")]
    FatalProvider { provider: String, message: String },

    #[error("calendar source unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("unrecognized envelope version {version} on topic {topic}")]
    UnknownVersion { topic: String, version: u32 },

    #[error("malformed payload on topic {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
