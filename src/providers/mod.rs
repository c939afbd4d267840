// Provider clients. Each fetch consumes one quota token (acquired by the
// caller); every HTTP outcome is classified here into the retry taxonomy.
pub mod alpaca;
pub mod finnhub;
pub mod yahoo;

use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use crate::models::PriceTick;
use crate::rate::ErrorClass;

pub use alpaca::{AlpacaClient, OrderAck, SessionTimes};
pub use finnhub::FinnhubClient;
pub use yahoo::YahooClient;

/// A classified provider failure, plus the server's explicit retry hint
/// when one was supplied.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub class: ErrorClass,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.class, self.message)
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::FatalClient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::TransientServer,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class == ErrorClass::FatalClient
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Network timeouts and connection failures are retryable; anything
        // structural (bad request construction, undecodable body) is not.
        if e.is_timeout() || e.is_connect() || (e.is_request() && e.status().is_none()) {
            Self::transient(e.to_string())
        } else {
            Self::fatal(e.to_string())
        }
    }
}

/// Map an HTTP status to the retry taxonomy: 429 → rate limited,
/// 5xx → transient server, any other non-success → fatal client.
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError {
            class: ErrorClass::RateLimited,
            message: format!("rate limited ({})", status),
            retry_after: retry_after_hint(headers),
        }
    } else if status.is_server_error() {
        ProviderError {
            class: ErrorClass::TransientServer,
            message: format!("server error ({})", status),
            retry_after: retry_after_hint(headers),
        }
    } else {
        ProviderError::fatal(format!("client error ({})", status))
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP-date forms are
/// ignored.
pub fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// A quote source the orchestrator can poll, ordered primary-first per data
/// kind. Tagged variants rather than trait objects keep the failover list a
/// plain `Vec`.
pub enum QuoteProvider {
    Finnhub(FinnhubClient),
    Yahoo(YahooClient),
}

impl QuoteProvider {
    /// Provenance tag stamped on published envelopes.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Finnhub(_) => "finnhub",
            Self::Yahoo(_) => "yahoo",
        }
    }

    /// Largest symbol batch one quota token covers.
    pub fn batch_size(&self) -> usize {
        match self {
            // Finnhub quotes are strictly one symbol per request.
            Self::Finnhub(_) => 1,
            Self::Yahoo(_) => yahoo::BATCH_SIZE,
        }
    }

    /// Fetch quotes for a batch no larger than `batch_size`. One HTTP
    /// request — the caller has already spent exactly one token on it.
    pub async fn fetch_quotes(
        &self,
        symbols: &[String],
    ) -> std::result::Result<Vec<PriceTick>, ProviderError> {
        match self {
            Self::Finnhub(client) => {
                let symbol = symbols
                    .first()
                    .ok_or_else(|| ProviderError::fatal("empty symbol batch"))?;
                Ok(vec![client.get_quote(symbol).await?])
            }
            Self::Yahoo(client) => client.get_quotes(symbols).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    #[test]
    fn status_classification() {
        let empty = HeaderMap::new();

        let e = classify_status(StatusCode::TOO_MANY_REQUESTS, &empty);
        assert_eq!(e.class, ErrorClass::RateLimited);

        let e = classify_status(StatusCode::BAD_GATEWAY, &empty);
        assert_eq!(e.class, ErrorClass::TransientServer);

        let e = classify_status(StatusCode::UNAUTHORIZED, &empty);
        assert_eq!(e.class, ErrorClass::FatalClient);

        let e = classify_status(StatusCode::NOT_FOUND, &empty);
        assert_eq!(e.class, ErrorClass::FatalClient);
    }

    #[test]
    fn retry_after_seconds_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("10"));

        let e = classify_status(StatusCode::TOO_MANY_REQUESTS, &headers);
        assert_eq!(e.retry_after, Some(Duration::from_secs(10)));
    }

    #[test]
    fn retry_after_http_date_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(retry_after_hint(&headers), None);
    }
}
