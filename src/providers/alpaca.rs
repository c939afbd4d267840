use chrono::{NaiveDate, NaiveTime};
use reqwest::Client;
use serde::Deserialize;

use crate::models::TradeOrder;

use super::{classify_status, ProviderError};

/// Broker and market-calendar client (Alpaca trading API).
///
/// The core never inspects broker response bodies beyond the narrow ack —
/// outcomes are classified as success / rate-limited / server-error /
/// client-error and handled by the retry policy.
#[derive(Clone)]
pub struct AlpacaClient {
    client: Client,
    base_url: String,
    key_id: String,
    secret: String,
}

/// Narrow acknowledgement from `submit`.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
}

/// Session open/close as exchange-local (America/New_York) times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimes {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct CalendarDay {
    date: NaiveDate,
    open: String,
    close: String,
}

// ============== Implementation ==============

impl AlpacaClient {
    pub fn new(base_url: String, key_id: String, secret: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            key_id,
            secret,
        }
    }

    fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("APCA-API-KEY-ID", &self.key_id)
            .header("APCA-API-SECRET-KEY", &self.secret)
    }

    /// Submit one order.
    /// Endpoint: POST /v2/orders
    pub async fn submit(&self, order: &TradeOrder) -> Result<OrderAck, ProviderError> {
        let mut body = serde_json::json!({
            "symbol": order.symbol,
            "side": order.side,
            "type": order.order_type,
            "time_in_force": "day",
        });
        if let Some(qty) = order.qty {
            body["qty"] = serde_json::json!(format!("{}", qty));
        }
        if let Some(notional) = order.notional {
            body["notional"] = serde_json::json!(format!("{:.2}", notional));
        }
        if let Some(limit) = order.limit_price {
            body["limit_price"] = serde_json::json!(format!("{}", limit));
        }

        let response = self
            .request(self.client.post(format!("{}/v2/orders", self.base_url)))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(classify_status(response.status(), response.headers()));
        }

        let ack: OrderResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(format!("malformed order ack: {}", e)))?;

        Ok(OrderAck {
            id: ack.id,
            status: ack.status,
        })
    }

    /// Trading session for one date, or `None` when the market is closed
    /// that day.
    /// Endpoint: GET /v2/calendar?start={date}&end={date}
    pub async fn calendar_day(
        &self,
        date: NaiveDate,
    ) -> Result<Option<SessionTimes>, ProviderError> {
        let url = format!(
            "{}/v2/calendar?start={}&end={}",
            self.base_url, date, date
        );

        let response = self.request(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), response.headers()));
        }

        let days: Vec<CalendarDay> = response
            .json()
            .await
            .map_err(|e| ProviderError::fatal(format!("malformed calendar body: {}", e)))?;

        // The range query returns the next open day; only an exact date
        // match means the market is open on `date`.
        let Some(day) = days.into_iter().find(|d| d.date == date) else {
            return Ok(None);
        };

        let open = NaiveTime::parse_from_str(&day.open, "%H:%M")
            .map_err(|e| ProviderError::fatal(format!("bad calendar open time: {}", e)))?;
        let close = NaiveTime::parse_from_str(&day.close, "%H:%M")
            .map_err(|e| ProviderError::fatal(format!("bad calendar close time: {}", e)))?;

        Ok(Some(SessionTimes { open, close }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderSide;
    use crate::rate::ErrorClass;
    use chrono::Utc;

    fn order() -> TradeOrder {
        TradeOrder {
            symbol: "AAPL".to_string(),
            ts: Utc::now(),
            side: OrderSide::Buy,
            qty: Some(10.0),
            notional: None,
            order_type: "market".to_string(),
            limit_price: None,
        }
    }

    #[tokio::test]
    async fn submit_parses_ack() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v2/orders")
            .match_header("APCA-API-KEY-ID", "key")
            .with_status(200)
            .with_body(r#"{"id": "abc-123", "status": "accepted"}"#)
            .create_async()
            .await;

        let client = AlpacaClient::new(server.url(), "key".to_string(), "secret".to_string());
        let ack = client.submit(&order()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(ack.id, "abc-123");
        assert_eq!(ack.status, "accepted");
    }

    #[tokio::test]
    async fn rejected_order_is_fatal_client() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v2/orders")
            .with_status(422)
            .with_body(r#"{"message": "insufficient buying power"}"#)
            .create_async()
            .await;

        let client = AlpacaClient::new(server.url(), "key".to_string(), "secret".to_string());
        let err = client.submit(&order()).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::FatalClient);
    }

    #[tokio::test]
    async fn calendar_day_parses_session_times() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v2/calendar")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"date": "2026-11-27", "open": "09:30", "close": "13:00"}]"#)
            .create_async()
            .await;

        let client = AlpacaClient::new(server.url(), "key".to_string(), "secret".to_string());
        let date = NaiveDate::from_ymd_opt(2026, 11, 27).unwrap();
        let session = client.calendar_day(date).await.unwrap().unwrap();

        assert_eq!(session.open, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(session.close, NaiveTime::from_hms_opt(13, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn closed_day_returns_none() {
        let mut server = mockito::Server::new_async().await;
        // Calendar range queries answer with the next open day.
        server
            .mock("GET", "/v2/calendar")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"[{"date": "2026-08-24", "open": "09:30", "close": "16:00"}]"#)
            .create_async()
            .await;

        let client = AlpacaClient::new(server.url(), "key".to_string(), "secret".to_string());
        let saturday = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();
        assert!(client.calendar_day(saturday).await.unwrap().is_none());
    }
}
