use crate::api::UpbitClient;
use crate::config::Settings;
use crate::db::SqliteStore;
use crate::engine::decision::{
    evaluate_buy, evaluate_sell, sell_cooldown_remaining, BuyEvaluation, EngineState,
    SellEvaluation,
};
use crate::indicators::{calculate_breakout_target, calculate_rsi, calculate_sma};
use crate::models::{Candle, IndicatorSnapshot, LedgerEntry, OrderSide};
use crate::pnl::Reconciler;
use crate::wallet;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// What went wrong during one decision cycle.
///
/// Market-data problems are transient: sleep and retry. Storage problems
/// affect the correctness of future decisions, so the cycle is aborted
/// before any trading happens; neither kills the process.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("market data unavailable: {0}")]
    MarketData(String),
    #[error("state store failure: {0}")]
    Storage(String),
}

/// The polling decision loop
pub struct Engine {
    client: UpbitClient,
    store: Arc<SqliteStore>,
    reconciler: Reconciler,
    settings: Settings,
    state: EngineState,
}

impl Engine {
    /// Build the engine and seed the last buy price.
    ///
    /// The seed comes from the store; on a first run it falls back to a
    /// fresh market-price lookup. If that lookup fails too, nothing is
    /// persisted and the engine starts with no effective floor.
    pub async fn bootstrap(
        client: UpbitClient,
        store: Arc<SqliteStore>,
        reconciler: Reconciler,
        settings: Settings,
    ) -> crate::Result<Self> {
        let mut trade_state = store.load_state().await?;

        if trade_state.last_buy_price == 0.0 {
            match client.get_current_price(&settings.market).await {
                Ok(price) => {
                    store.save_last_buy_price(price).await?;
                    trade_state.last_buy_price = price;
                    tracing::info!("Seeded last buy price from market: {:.0}", price);
                }
                Err(e) => {
                    tracing::warn!(
                        "No stored buy price and market lookup failed ({}), starting with no price floor",
                        e
                    );
                }
            }
        } else {
            tracing::info!("Restored last buy price: {:.0}", trade_state.last_buy_price);
        }

        Ok(Self {
            client,
            store,
            reconciler,
            settings,
            state: EngineState::from_trade_state(trade_state),
        })
    }

    /// Run the loop until the task is cancelled. No cycle overlaps another;
    /// each cycle's failures degrade to sleep-and-retry.
    pub async fn run(&mut self) {
        tracing::info!(
            "Starting auto-trade loop for {} (every {}s)",
            self.settings.market,
            self.settings.poll_interval_secs
        );

        loop {
            let delay = match self.run_cycle().await {
                Ok(()) => self.settings.poll_interval_secs,
                Err(CycleError::MarketData(e)) => {
                    tracing::warn!("Cycle skipped, market data unavailable: {}", e);
                    self.settings.backoff_secs
                }
                Err(CycleError::Storage(e)) => {
                    tracing::error!("Cycle skipped, state store failure: {}", e);
                    self.settings.backoff_secs
                }
            };

            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
        }
    }

    /// One decision cycle: fetch, compute, decide, act
    async fn run_cycle(&mut self) -> Result<(), CycleError> {
        let now = Utc::now();
        let market = self.settings.market.clone();

        // Re-read durable state first; trading on stale or default state is
        // worse than skipping the cycle
        let trade_state = self
            .store
            .load_state()
            .await
            .map_err(|e| CycleError::Storage(e.to_string()))?;
        self.state.last_buy_price = trade_state.last_buy_price;
        self.state.last_sell_time = trade_state.last_sell_time;

        let candles = self
            .client
            .get_candles(&market, self.settings.candle_count)
            .await
            .map_err(|e| CycleError::MarketData(e.to_string()))?;

        let snapshot = self.compute_indicators(&candles).await?;

        let quote_balance = self.fetch_balance_or_zero(self.settings.quote_currency()).await;
        let base_balance = self.fetch_balance_or_zero(self.settings.base_currency()).await;

        self.log_status(&snapshot, quote_balance, base_balance, now);

        match evaluate_buy(
            &snapshot,
            quote_balance,
            base_balance,
            &self.state,
            now,
            &self.settings.rules,
        ) {
            BuyEvaluation::Order { notional, reason } => {
                tracing::info!("[BUY] {} detected", reason.describe());
                self.execute_buy(notional, &snapshot, now).await?;
            }
            BuyEvaluation::SkippedBelowNotional { notional } => {
                tracing::info!(
                    "[BUY] signal fired but order value {:.0} is below the exchange minimum, skipping",
                    notional
                );
            }
            BuyEvaluation::NotEligible => {}
        }

        match evaluate_sell(&snapshot, base_balance, &self.state, now, &self.settings.rules) {
            SellEvaluation::Order { volume, reason } => {
                tracing::info!("[SELL] {} detected", reason.describe());
                self.execute_sell(volume, &snapshot, now).await?;
            }
            SellEvaluation::SkippedBelowNotional { notional } => {
                tracing::info!(
                    "[SELL] signal fired but order value {:.0} is below the exchange minimum, skipping",
                    notional
                );
            }
            SellEvaluation::NotEligible => {
                if let Some(remaining) = sell_cooldown_remaining(&self.state, now, &self.settings.rules)
                {
                    tracing::info!("Sell cooldown active, {}s remaining", remaining);
                }
            }
        }

        Ok(())
    }

    /// Derive the indicator snapshot from the candle window. Any missing
    /// value means the window is unusable and takes the same retry path as
    /// a fetch failure.
    async fn compute_indicators(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, CycleError> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        let current_price = self
            .client
            .get_current_price(&self.settings.market)
            .await
            .map_err(|e| CycleError::MarketData(e.to_string()))?;

        let rsi = calculate_rsi(&closes, self.settings.rsi_period)
            .ok_or_else(|| CycleError::MarketData("not enough candles for RSI".to_string()))?;
        let short_ma = calculate_sma(&closes, self.settings.short_ma_period)
            .ok_or_else(|| CycleError::MarketData("not enough candles for short MA".to_string()))?;
        let long_ma = calculate_sma(&closes, self.settings.long_ma_period)
            .ok_or_else(|| CycleError::MarketData("not enough candles for long MA".to_string()))?;
        let breakout_target = calculate_breakout_target(candles, self.settings.breakout_k)
            .ok_or_else(|| CycleError::MarketData("not enough candles for breakout".to_string()))?;

        Ok(IndicatorSnapshot {
            current_price,
            rsi,
            short_ma,
            long_ma,
            breakout_target,
        })
    }

    /// A failed balance lookup degrades to 0, a posture that cannot trade
    async fn fetch_balance_or_zero(&self, currency: &str) -> f64 {
        match self.client.get_balance(currency).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!("Balance lookup for {} failed ({}), treating as 0", currency, e);
                0.0
            }
        }
    }

    fn log_status(
        &mut self,
        snapshot: &IndicatorSnapshot,
        quote_balance: f64,
        base_balance: f64,
        now: DateTime<Utc>,
    ) {
        let due = match self.state.last_status_time {
            Some(last) => now - last >= Duration::seconds(self.settings.status_interval_secs),
            None => true,
        };
        if !due {
            return;
        }

        let total_value = quote_balance + base_balance * snapshot.current_price;
        tracing::info!(
            "{} price {:.0} | RSI {:.2} | MA {:.0}/{:.0} | breakout {:.0}",
            self.settings.market,
            snapshot.current_price,
            snapshot.rsi,
            snapshot.short_ma,
            snapshot.long_ma,
            snapshot.breakout_target
        );
        tracing::info!(
            "{} balance {:.0} | {} balance {:.8} | total value {:.0}",
            self.settings.quote_currency(),
            quote_balance,
            self.settings.base_currency(),
            base_balance,
            total_value
        );

        self.state.last_status_time = Some(now);
    }

    async fn execute_buy(
        &mut self,
        notional: f64,
        snapshot: &IndicatorSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), CycleError> {
        let order = self
            .client
            .place_market_order(&self.settings.market, OrderSide::Bid, notional)
            .await
            .map_err(|e| CycleError::MarketData(e.to_string()))?;

        let Some(order) = order else {
            // Rejection leaves every piece of state untouched; the next
            // cycle re-evaluates from scratch
            tracing::warn!("Buy order was not accepted, no follow-up");
            return Ok(());
        };

        self.state.last_buy_time = Some(now);
        self.state.last_buy_price = snapshot.current_price;

        self.store
            .save_last_buy_price(snapshot.current_price)
            .await
            .map_err(|e| CycleError::Storage(e.to_string()))?;

        let entry = LedgerEntry {
            market: self.settings.market.clone(),
            side: OrderSide::Bid,
            price: snapshot.current_price,
            volume: notional / snapshot.current_price,
            total_cost: notional,
            trade_time: now,
        };
        self.store
            .insert_ledger_entry(&entry)
            .await
            .map_err(|e| CycleError::Storage(e.to_string()))?;

        tracing::info!(
            "Buy order {} filled, recorded buy price {:.0}",
            order.order_id,
            snapshot.current_price
        );

        self.refresh_wallet().await;

        Ok(())
    }

    async fn execute_sell(
        &mut self,
        volume: f64,
        snapshot: &IndicatorSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), CycleError> {
        let order = self
            .client
            .place_market_order(&self.settings.market, OrderSide::Ask, volume)
            .await
            .map_err(|e| CycleError::MarketData(e.to_string()))?;

        let Some(order) = order else {
            tracing::warn!("Sell order was not accepted, no follow-up");
            return Ok(());
        };

        self.state.last_sell_time = now;

        self.store
            .save_last_sell_time(now)
            .await
            .map_err(|e| CycleError::Storage(e.to_string()))?;

        let entry = LedgerEntry {
            market: self.settings.market.clone(),
            side: OrderSide::Ask,
            price: snapshot.current_price,
            volume,
            total_cost: volume * snapshot.current_price,
            trade_time: now,
        };
        self.store
            .insert_ledger_entry(&entry)
            .await
            .map_err(|e| CycleError::Storage(e.to_string()))?;

        tracing::info!("Sell order {} executed", order.order_id);

        // Reconciliation and wallet refresh are reporting, not trading;
        // their failures must not fail the cycle
        if let Err(e) = self.reconciler.reconcile(&self.settings.market).await {
            tracing::warn!("Post-sell PnL reconciliation failed: {}", e);
        }
        self.refresh_wallet().await;

        Ok(())
    }

    async fn refresh_wallet(&self) {
        if let Err(e) = wallet::refresh(
            &self.client,
            &self.store,
            &self.settings,
        )
        .await
        {
            tracing::warn!("Wallet refresh failed: {}", e);
        }
    }
}
