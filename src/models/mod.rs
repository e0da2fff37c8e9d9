use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub market: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Account balance for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub balance: f64,
    pub locked: f64,
    pub avg_buy_price: f64,
}

/// Order side, Upbit naming: bid = buy, ask = sell
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Bid,
    Ask,
}

impl OrderSide {
    /// Wire representation used by the exchange and the ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Bid => "bid",
            OrderSide::Ask => "ask",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bid" => Some(OrderSide::Bid),
            "ask" => Some(OrderSide::Ask),
            _ => None,
        }
    }
}

/// Accepted market order, as confirmed by the exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub side: OrderSide,
    /// Spent amount for market buys, None for market sells
    pub price: Option<f64>,
    /// Sold volume for market sells, None for market buys
    pub volume: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// One executed trade, as recorded in the ledger. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub market: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub total_cost: f64,
    pub trade_time: DateTime<Utc>,
}

/// One public market fill from the exchange trade-tick feed (not our own
/// order). Used for the startup recent-activity report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTrade {
    pub market: String,
    pub side: OrderSide,
    pub price: f64,
    pub volume: f64,
    pub trade_time: DateTime<Utc>,
}

/// Durable trading state: the most recent confirmed buy price and sell time.
/// Singleton row, replaced atomically after a confirmed order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TradeState {
    /// 0.0 means "no effective floor" (nothing bought yet)
    pub last_buy_price: f64,
    pub last_sell_time: DateTime<Utc>,
}

impl Default for TradeState {
    fn default() -> Self {
        Self {
            last_buy_price: 0.0,
            last_sell_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Indicators derived from the latest candle window. Recomputed each cycle,
/// never persisted.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSnapshot {
    pub current_price: f64,
    pub rsi: f64,
    pub short_ma: f64,
    pub long_ma: f64,
    pub breakout_target: f64,
}

/// Realized/unrealized profit derived from the trade ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlReport {
    pub market: String,
    pub total_buy_cost: f64,
    pub total_sell_proceeds: f64,
    pub net_position: f64,
    pub current_price: f64,
    pub current_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
}
