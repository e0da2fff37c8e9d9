use crate::models::{Balance, LedgerEntry, MarketTrade, OrderSide, TradeState};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Sqlite persistence for trade state, the trade ledger, wallet snapshots
/// and recent market trades
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Ledger aggregates for one market, the inputs to PnL derivation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerSummary {
    pub total_buy_cost: f64,
    pub total_sell_proceeds: f64,
    pub total_bought_volume: f64,
    pub total_sold_volume: f64,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn new(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;

        tracing::info!("Opened sqlite store at {}", path.display());

        Ok(store)
    }

    /// In-memory database for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // One connection only: each sqlite in-memory connection is its own db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_buy_price REAL NOT NULL DEFAULT 0,
                last_sell_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_time TEXT NOT NULL,
                market TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL,
                total_cost REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS wallet (
                currency TEXT PRIMARY KEY,
                balance REAL NOT NULL,
                locked REAL NOT NULL,
                avg_buy_price REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_time TEXT NOT NULL,
                market TEXT NOT NULL,
                side TEXT NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Trade state (singleton row)
    // ------------------------------------------------------------------

    /// Load the persisted trade state, or the default when no prior state
    /// exists (first run)
    pub async fn load_state(&self) -> Result<TradeState> {
        let row = sqlx::query(
            "SELECT last_buy_price, last_sell_time FROM trade_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(TradeState {
                last_buy_price: row.get("last_buy_price"),
                last_sell_time: row.get("last_sell_time"),
            }),
            None => Ok(TradeState::default()),
        }
    }

    /// Replace the persisted last buy price, keeping the last sell time.
    /// A single upsert statement, so a concurrent reader never observes an
    /// empty state window.
    pub async fn save_last_buy_price(&self, price: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_state (id, last_buy_price, last_sell_time)
            VALUES (1, $1, $2)
            ON CONFLICT (id) DO UPDATE SET last_buy_price = excluded.last_buy_price
            "#,
        )
        .bind(price)
        .bind(DateTime::<Utc>::UNIX_EPOCH)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved last buy price {:.0}", price);

        Ok(())
    }

    /// Replace the persisted last sell time, keeping the last buy price
    pub async fn save_last_sell_time(&self, time: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_state (id, last_buy_price, last_sell_time)
            VALUES (1, 0, $1)
            ON CONFLICT (id) DO UPDATE SET last_sell_time = excluded.last_sell_time
            "#,
        )
        .bind(time)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved last sell time {}", time);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Trade ledger (append-only)
    // ------------------------------------------------------------------

    pub async fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_history (trade_time, market, side, price, volume, total_cost)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.trade_time)
        .bind(&entry.market)
        .bind(entry.side.as_str())
        .bind(entry.price)
        .bind(entry.volume)
        .bind(entry.total_cost)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Recorded {} of {:.8} {} at {:.0}",
            entry.side.as_str(),
            entry.volume,
            entry.market,
            entry.price
        );

        Ok(())
    }

    /// All ledger entries for a market, oldest first
    pub async fn ledger_by_market(&self, market: &str) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT trade_time, market, side, price, volume, total_cost
            FROM trade_history
            WHERE market = $1
            ORDER BY id ASC
            "#,
        )
        .bind(market)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::new();

        for row in rows {
            let side_str: String = row.get("side");
            let side = OrderSide::parse(&side_str)
                .ok_or_else(|| format!("invalid ledger side {:?}", side_str))?;

            entries.push(LedgerEntry {
                market: row.get("market"),
                side,
                price: row.get("price"),
                volume: row.get("volume"),
                total_cost: row.get("total_cost"),
                trade_time: row.get("trade_time"),
            });
        }

        Ok(entries)
    }

    /// Buy/sell cost and volume sums for a market
    pub async fn ledger_summary(&self, market: &str) -> Result<LedgerSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN side = 'bid' THEN total_cost END), 0.0) AS total_buy_cost,
                COALESCE(SUM(CASE WHEN side = 'ask' THEN total_cost END), 0.0) AS total_sell_proceeds,
                COALESCE(SUM(CASE WHEN side = 'bid' THEN volume END), 0.0) AS total_bought_volume,
                COALESCE(SUM(CASE WHEN side = 'ask' THEN volume END), 0.0) AS total_sold_volume
            FROM trade_history
            WHERE market = $1
            "#,
        )
        .bind(market)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerSummary {
            total_buy_cost: row.get("total_buy_cost"),
            total_sell_proceeds: row.get("total_sell_proceeds"),
            total_bought_volume: row.get("total_bought_volume"),
            total_sold_volume: row.get("total_sold_volume"),
        })
    }

    // ------------------------------------------------------------------
    // Wallet snapshot (full replace)
    // ------------------------------------------------------------------

    /// Replace the wallet snapshot with the current balances, in one
    /// transaction
    pub async fn replace_wallet(&self, balances: &[Balance]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM wallet").execute(&mut *tx).await?;

        for balance in balances {
            sqlx::query(
                r#"
                INSERT INTO wallet (currency, balance, locked, avg_buy_price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&balance.currency)
            .bind(balance.balance)
            .bind(balance.locked)
            .bind(balance.avg_buy_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!("Saved wallet snapshot ({} currencies)", balances.len());

        Ok(())
    }

    pub async fn load_wallet(&self) -> Result<Vec<Balance>> {
        let rows = sqlx::query("SELECT currency, balance, locked, avg_buy_price FROM wallet")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Balance {
                currency: row.get("currency"),
                balance: row.get("balance"),
                locked: row.get("locked"),
                avg_buy_price: row.get("avg_buy_price"),
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Market trade ticks
    // ------------------------------------------------------------------

    pub async fn insert_market_trades(&self, trades: &[MarketTrade]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for trade in trades {
            sqlx::query(
                r#"
                INSERT INTO transactions (trade_time, market, side, price, volume)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(trade.trade_time)
            .bind(&trade.market)
            .bind(trade.side.as_str())
            .bind(trade.price)
            .bind(trade.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Most recent stored market trades, newest first
    pub async fn recent_market_trades(
        &self,
        market: &str,
        limit: i64,
    ) -> Result<Vec<MarketTrade>> {
        let rows = sqlx::query(
            r#"
            SELECT trade_time, market, side, price, volume
            FROM transactions
            WHERE market = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(market)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut trades = Vec::new();

        for row in rows {
            let side_str: String = row.get("side");
            let side = OrderSide::parse(&side_str)
                .ok_or_else(|| format!("invalid trade side {:?}", side_str))?;

            trades.push(MarketTrade {
                market: row.get("market"),
                side,
                price: row.get("price"),
                volume: row.get("volume"),
                trade_time: row.get("trade_time"),
            });
        }

        Ok(trades)
    }
}
