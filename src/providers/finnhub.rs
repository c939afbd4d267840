use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::models::{NewsItem, PriceTick};

use super::{classify_status, ProviderError};

const FINNHUB_API_BASE: &str = "https://finnhub.io/api/v1";

/// Client for the Finnhub REST API (quotes and general news).
///
/// Free plans allow roughly 60 requests/minute; the orchestrator's rate
/// governor enforces the configured quota, this client never throttles
/// itself.
#[derive(Clone)]
pub struct FinnhubClient {
    client: Client,
    base_url: String,
    api_key: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price.
    #[serde(default)]
    c: f64,
    /// Quote timestamp (unix seconds); 0 when unknown.
    #[serde(default)]
    t: i64,
}

#[derive(Debug, Deserialize)]
struct NewsEntry {
    #[serde(default)]
    datetime: i64,
    headline: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    related: String,
}

// ============== Implementation ==============

impl FinnhubClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, FINNHUB_API_BASE.to_string())
    }

    /// Point the client at a different host (mock server in tests).
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    /// Current quote for one symbol.
    /// Endpoint: GET /quote?symbol={symbol}&token={key}
    pub async fn get_quote(&self, symbol: &str) -> Result<PriceTick, ProviderError> {
        let url = format!(
            "{}/quote?symbol={}&token={}",
            self.base_url, symbol, self.api_key
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), response.headers()));
        }

        let quote: QuoteResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(format!("malformed quote body: {}", e)))?;

        // Finnhub answers 200 with c=0 for unknown symbols.
        if quote.c <= 0.0 {
            return Err(ProviderError::fatal(format!("no price for {}", symbol)));
        }

        Ok(PriceTick {
            symbol: symbol.to_string(),
            ts: quote_timestamp(quote.t),
            price: quote.c,
            volume: None,
            source: "finnhub".to_string(),
        })
    }

    /// General market headlines.
    /// Endpoint: GET /news?category=general&token={key}
    pub async fn get_news(&self) -> Result<Vec<NewsItem>, ProviderError> {
        let url = format!(
            "{}/news?category=general&token={}",
            self.base_url, self.api_key
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), response.headers()));
        }

        let entries: Vec<NewsEntry> = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(format!("malformed news body: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|entry| NewsItem {
                ts: quote_timestamp(entry.datetime),
                headline: entry.headline,
                symbols: entry
                    .related
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                source: if entry.source.is_empty() {
                    "finnhub".to_string()
                } else {
                    entry.source
                },
            })
            .collect())
    }
}

fn quote_timestamp(unix: i64) -> DateTime<Utc> {
    if unix > 0 {
        Utc.timestamp_opt(unix, 0).single().unwrap_or_else(Utc::now)
    } else {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::ErrorClass;
    use std::time::Duration;

    #[tokio::test]
    async fn parses_quote_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::UrlEncoded("symbol".into(), "AAPL".into()))
            .with_status(200)
            .with_body(r#"{"c": 187.25, "t": 1767312000}"#)
            .create_async()
            .await;

        let client = FinnhubClient::with_base_url("key".to_string(), server.url());
        let tick = client.get_quote("AAPL").await.unwrap();

        mock.assert_async().await;
        assert_eq!(tick.symbol, "AAPL");
        assert_eq!(tick.price, 187.25);
        assert_eq!(tick.source, "finnhub");
    }

    #[tokio::test]
    async fn zero_price_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"c": 0, "t": 0}"#)
            .create_async()
            .await;

        let client = FinnhubClient::with_base_url("key".to_string(), server.url());
        let err = client.get_quote("NOPE").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::FatalClient);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after_hint() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_header("Retry-After", "10")
            .create_async()
            .await;

        let client = FinnhubClient::with_base_url("key".to_string(), server.url());
        let err = client.get_quote("AAPL").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quote")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = FinnhubClient::with_base_url("key".to_string(), server.url());
        let err = client.get_quote("AAPL").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::TransientServer);
    }

    #[tokio::test]
    async fn parses_news_with_related_symbols() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/news")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[
                    {"datetime": 1767312000, "headline": "Tech rally continues", "source": "Reuters", "related": "AAPL,MSFT"},
                    {"datetime": 1767312060, "headline": "Fed holds rates", "source": "", "related": ""}
                ]"#,
            )
            .create_async()
            .await;

        let client = FinnhubClient::with_base_url("key".to_string(), server.url());
        let news = client.get_news().await.unwrap();

        assert_eq!(news.len(), 2);
        assert_eq!(news[0].symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(news[1].symbols, Vec::<String>::new());
        assert_eq!(news[1].source, "finnhub");
    }
}
