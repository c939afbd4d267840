use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::models::PriceTick;

use super::{classify_status, ProviderError};

const YAHOO_API_BASE: &str = "https://query1.finance.yahoo.com";

/// Documented ceiling for one bulk quote request.
pub const BATCH_SIZE: usize = 50;

/// Client for the (keyless) Yahoo Finance bulk quote endpoint. Used as the
/// fallback quote source; one request covers a whole symbol batch.
#[derive(Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Vec<QuoteRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRow {
    symbol: String,
    regular_market_price: Option<f64>,
    post_market_price: Option<f64>,
    regular_market_volume: Option<f64>,
}

// ============== Implementation ==============

impl YahooClient {
    pub fn new() -> Self {
        Self::with_base_url(YAHOO_API_BASE.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }

    /// Bulk quotes for up to [`BATCH_SIZE`] symbols in one request.
    /// Endpoint: GET /v7/finance/quote?symbols=a,b,c
    ///
    /// Symbols missing from the response are simply absent from the result;
    /// the caller decides whether that matters.
    pub async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<PriceTick>, ProviderError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/v7/finance/quote?symbols={}",
            self.base_url,
            symbols.join(",")
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), response.headers()));
        }

        let data: QuoteEnvelope = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(format!("malformed quote body: {}", e)))?;

        let now = Utc::now();
        let ticks = data
            .quote_response
            .result
            .into_iter()
            .filter_map(|row| {
                let price = row.regular_market_price.or(row.post_market_price)?;
                Some(PriceTick {
                    symbol: row.symbol,
                    ts: now,
                    price,
                    volume: row.regular_market_volume,
                    source: "yahoo".to_string(),
                })
            })
            .collect();

        Ok(ticks)
    }
}

impl Default for YahooClient {
    fn default() -> Self {
        Self::new()
    }
}
