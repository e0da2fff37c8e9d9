use crate::models::{Balance, Candle, MarketTrade, OrderResult, OrderSide};
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::time::Duration;

// Upbit REST API v1
// Docs: https://docs.upbit.com/reference
const UPBIT_API: &str = "https://api.upbit.com";

// A hung exchange call must not stall the trading loop; a timeout is
// handled the same as any other fetch failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the Upbit exchange API (market data + account)
#[derive(Clone)]
pub struct UpbitClient {
    client: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
}

#[derive(Debug, Serialize)]
struct AuthClaims {
    access_key: String,
    nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_hash_alg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    trade_price: f64,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
    /// Milliseconds since the epoch
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    currency: String,
    balance: String,
    locked: String,
    avg_buy_price: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    uuid: String,
    side: String,
    price: Option<String>,
    volume: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradeTickResponse {
    trade_date_utc: String,
    trade_time_utc: String,
    trade_price: f64,
    trade_volume: f64,
    ask_bid: String,
}

impl UpbitClient {
    pub fn new(access_key: String, secret_key: String) -> Result<Self> {
        Self::with_base_url(UPBIT_API.to_string(), access_key, secret_key)
    }

    /// Point the client at a different server (used by tests)
    pub fn with_base_url(base_url: String, access_key: String, secret_key: String) -> Result<Self> {
        // A client without the timeout would let a hung request stall the
        // loop, so a builder failure is an error, not a fallback
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            access_key,
            secret_key,
        })
    }

    /// Build the Bearer token for authenticated endpoints
    ///
    /// Upbit expects a JWT (HS256) carrying the access key, a random nonce,
    /// and, when the request has parameters, a SHA-512 hash of the exact
    /// query string sent.
    fn auth_token(&self, query: Option<&str>) -> Result<String> {
        let (query_hash, query_hash_alg) = match query {
            Some(q) => {
                let mut hasher = Sha512::new();
                hasher.update(q.as_bytes());
                (Some(hex::encode(hasher.finalize())), Some("SHA512".to_string()))
            }
            None => (None, None),
        };

        let claims = AuthClaims {
            access_key: self.access_key.clone(),
            nonce: uuid::Uuid::new_v4().to_string(),
            query_hash,
            query_hash_alg,
        };

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.secret_key.as_bytes()),
        )?;

        Ok(format!("Bearer {}", token))
    }

    /// Get the current trade price for a market
    pub async fn get_current_price(&self, market: &str) -> Result<f64> {
        let url = format!("{}/v1/ticker?markets={}", self.base_url, market);

        let tickers: Vec<TickerResponse> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let ticker = tickers
            .first()
            .ok_or_else(|| format!("empty ticker response for {}", market))?;

        Ok(ticker.trade_price)
    }

    /// Get the most recent minute candles for a market, oldest first
    ///
    /// The exchange returns candles newest first; they are reversed here so
    /// indicator code can treat the last element as the latest candle.
    pub async fn get_candles(&self, market: &str, count: usize) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v1/candles/minutes/1?market={}&count={}",
            self.base_url, market, count
        );

        let raw: Vec<CandleResponse> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if raw.is_empty() {
            return Err(format!("empty candle response for {}", market).into());
        }

        let mut candles: Vec<Candle> = raw
            .into_iter()
            .map(|c| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(c.timestamp)
                    .ok_or_else(|| format!("invalid candle timestamp {}", c.timestamp))?;
                Ok(Candle {
                    market: market.to_string(),
                    timestamp,
                    open: c.opening_price,
                    high: c.high_price,
                    low: c.low_price,
                    close: c.trade_price,
                    volume: c.candle_acc_trade_volume,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        candles.reverse();
        Ok(candles)
    }

    /// Get recent public fills for a market, oldest first
    pub async fn get_recent_trades(&self, market: &str, count: usize) -> Result<Vec<MarketTrade>> {
        let query = format!("count={}&market={}", count, market);
        let url = format!("{}/v1/trades/ticks?{}", self.base_url, query);
        let token = self.auth_token(Some(&query))?;

        let raw: Vec<TradeTickResponse> = self
            .client
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut trades: Vec<MarketTrade> = raw
            .into_iter()
            .map(|t| {
                let date: NaiveDate = t.trade_date_utc.parse()?;
                let time: NaiveTime = t.trade_time_utc.parse()?;
                let side = OrderSide::parse(&t.ask_bid)
                    .ok_or_else(|| format!("unknown trade side {:?}", t.ask_bid))?;
                Ok(MarketTrade {
                    market: market.to_string(),
                    side,
                    price: t.trade_price,
                    volume: t.trade_volume,
                    trade_time: date.and_time(time).and_utc(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        trades.reverse();
        Ok(trades)
    }

    /// Get all account balances
    pub async fn get_balances(&self) -> Result<Vec<Balance>> {
        let url = format!("{}/v1/accounts", self.base_url);
        let token = self.auth_token(None)?;

        let accounts: Vec<AccountResponse> = self
            .client
            .get(&url)
            .header("Authorization", token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let balances = accounts
            .into_iter()
            .map(|a| {
                Ok(Balance {
                    currency: a.currency,
                    balance: a.balance.parse()?,
                    locked: a.locked.parse()?,
                    avg_buy_price: a.avg_buy_price.parse().unwrap_or(0.0),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(balances)
    }

    /// Get the available balance for one currency (0 if not held)
    pub async fn get_balance(&self, currency: &str) -> Result<f64> {
        let balances = self.get_balances().await?;

        Ok(balances
            .iter()
            .find(|b| b.currency == currency)
            .map(|b| b.balance)
            .unwrap_or(0.0))
    }

    /// Place a market order
    ///
    /// - `OrderSide::Bid`: `amount` is the quote-currency amount to spend
    ///   (ord_type "price")
    /// - `OrderSide::Ask`: `amount` is the base-currency volume to sell
    ///   (ord_type "market")
    ///
    /// Returns `Ok(None)` when the exchange rejects the order; a rejection is
    /// an expected outcome, not a transport failure.
    pub async fn place_market_order(
        &self,
        market: &str,
        side: OrderSide,
        amount: f64,
    ) -> Result<Option<OrderResult>> {
        // Parameter order must match the hashed query string exactly
        let query = match side {
            OrderSide::Bid => format!("market={}&ord_type=price&price={}&side=bid", market, amount),
            OrderSide::Ask => {
                format!("market={}&ord_type=market&side=ask&volume={}", market, amount)
            }
        };

        let url = format!("{}/v1/orders?{}", self.base_url, query);
        let token = self.auth_token(Some(&query))?;

        let response = self
            .client
            .post(&url)
            .header("Authorization", token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                "Order rejected by exchange ({}): {}",
                status,
                rejection_reason(&body)
            );
            return Ok(None);
        }

        let order: OrderResponse = response.json().await?;

        let order_side = OrderSide::parse(&order.side)
            .ok_or_else(|| format!("unknown order side {:?}", order.side))?;
        let created_at = order
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(Some(OrderResult {
            order_id: order.uuid,
            side: order_side,
            price: order.price.as_deref().and_then(|p| p.parse().ok()),
            volume: order.volume.as_deref().and_then(|v| v.parse().ok()),
            created_at,
        }))
    }
}

/// Extract the exchange's error name from a rejection body
/// (`{"error":{"name":...,"message":...}}`), falling back to the raw text
fn rejection_reason(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(server: &mockito::ServerGuard) -> UpbitClient {
        UpbitClient::with_base_url(
            server.url(),
            "test-access".to_string(),
            "test-secret".to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_get_current_price() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/ticker?markets=KRW-BTC")
            .with_status(200)
            .with_body(r#"[{"market":"KRW-BTC","trade_price":50000000.0}]"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let price = client.get_current_price("KRW-BTC").await.unwrap();
        assert_eq!(price, 50000000.0);
    }

    #[tokio::test]
    async fn test_get_current_price_server_error_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/ticker?markets=KRW-BTC")
            .with_status(500)
            .with_body(r#"{"error":{"name":"server_error"}}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        assert!(client.get_current_price("KRW-BTC").await.is_err());
    }

    #[tokio::test]
    async fn test_get_balances_server_error_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/accounts")
            .with_status(401)
            .with_body(r#"{"error":{"name":"invalid_access_key"}}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        assert!(client.get_balances().await.is_err());
    }

    #[test]
    fn test_rejection_reason_extracts_error_name() {
        assert_eq!(
            rejection_reason(r#"{"error":{"name":"insufficient_funds_bid","message":"..."}}"#),
            "insufficient_funds_bid"
        );
        // Anything unparseable falls through as-is
        assert_eq!(rejection_reason("plain text error"), "plain text error");
    }

    #[tokio::test]
    async fn test_get_current_price_empty_response_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/ticker?markets=KRW-BTC")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = test_client(&server);
        assert!(client.get_current_price("KRW-BTC").await.is_err());
    }

    #[tokio::test]
    async fn test_get_candles_reversed_to_oldest_first() {
        let mut server = mockito::Server::new_async().await;
        // Exchange order: newest first
        let body = r#"[
            {"opening_price":101.0,"high_price":103.0,"low_price":100.0,"trade_price":102.0,"candle_acc_trade_volume":2.0,"timestamp":1700000060000},
            {"opening_price":100.0,"high_price":102.0,"low_price":99.0,"trade_price":101.0,"candle_acc_trade_volume":1.0,"timestamp":1700000000000}
        ]"#;
        let _m = server
            .mock("GET", "/v1/candles/minutes/1?market=KRW-BTC&count=2")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = test_client(&server);
        let candles = client.get_candles("KRW-BTC", 2).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
        assert_eq!(candles[0].close, 101.0);
        assert_eq!(candles[1].close, 102.0);
    }

    #[tokio::test]
    async fn test_get_candles_empty_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/v1/candles/minutes/1?market=KRW-BTC&count=200")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = test_client(&server);
        assert!(client.get_candles("KRW-BTC", 200).await.is_err());
    }

    #[tokio::test]
    async fn test_get_balance_missing_currency_is_zero() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"[
            {"currency":"KRW","balance":"150000.5","locked":"0.0","avg_buy_price":"0"}
        ]"#;
        let _m = server
            .mock("GET", "/v1/accounts")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = test_client(&server);
        assert_eq!(client.get_balance("KRW").await.unwrap(), 150000.5);

        let _m2 = server
            .mock("GET", "/v1/accounts")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;
        assert_eq!(client.get_balance("BTC").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_place_market_order_rejection_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock(
                "POST",
                "/v1/orders?market=KRW-BTC&ord_type=price&price=9000&side=bid",
            )
            .with_status(400)
            .with_body(r#"{"error":{"name":"insufficient_funds_bid"}}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let result = client
            .place_market_order("KRW-BTC", OrderSide::Bid, 9000.0)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_place_market_order_success() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"{
            "uuid":"cdd92199-2897-4e14-9448-f923320408ad",
            "side":"bid",
            "ord_type":"price",
            "price":"9000.0",
            "created_at":"2024-01-01T00:00:00+09:00"
        }"#;
        let _m = server
            .mock(
                "POST",
                "/v1/orders?market=KRW-BTC&ord_type=price&price=9000&side=bid",
            )
            .with_status(201)
            .with_body(body)
            .create_async()
            .await;

        let client = test_client(&server);
        let order = client
            .place_market_order("KRW-BTC", OrderSide::Bid, 9000.0)
            .await
            .unwrap()
            .expect("order should be accepted");

        assert_eq!(order.order_id, "cdd92199-2897-4e14-9448-f923320408ad");
        assert_eq!(order.side, OrderSide::Bid);
        assert_eq!(order.price, Some(9000.0));
        assert_eq!(order.volume, None);
    }
}
