use crate::models::{IndicatorSnapshot, TradeState};
use chrono::{DateTime, Duration, Utc};

/// Thresholds and sizing for the entry/exit rules
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Minimum seconds between two actions of the same kind
    pub cooldown_secs: i64,
    /// Percentage of the quote balance spent on a buy
    pub buy_percent: f64,
    /// Percentage of the base balance sold on a sell
    pub sell_percent: f64,
    /// Exchange minimum order value; orders below it are skipped
    pub min_order_notional: f64,
    pub rsi_buy_threshold: f64,
    pub rsi_sell_threshold: f64,
    /// Minimum gain over the last buy price required to confirm a sell
    pub sell_gain_min: f64,
    /// Gain over the last buy price that on its own triggers a sell
    pub sell_gain_trigger: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            buy_percent: 90.0,
            sell_percent: 100.0,
            min_order_notional: 5000.0,
            rsi_buy_threshold: 30.0,
            rsi_sell_threshold: 70.0,
            sell_gain_min: 0.005,
            sell_gain_trigger: 0.01,
        }
    }
}

/// Mutable loop state, threaded through each cycle explicitly.
///
/// `last_buy_price` and `last_sell_time` mirror the durable [`TradeState`];
/// `last_buy_time` is in-memory only and resets on restart.
#[derive(Debug, Clone, Copy)]
pub struct EngineState {
    pub last_buy_time: Option<DateTime<Utc>>,
    pub last_buy_price: f64,
    pub last_sell_time: DateTime<Utc>,
    pub last_status_time: Option<DateTime<Utc>>,
}

impl EngineState {
    pub fn from_trade_state(state: TradeState) -> Self {
        Self {
            last_buy_time: None,
            last_buy_price: state.last_buy_price,
            last_sell_time: state.last_sell_time,
            last_status_time: None,
        }
    }
}

/// Why a buy fired. Oversold is checked before the cross so the reported
/// reason stays stable when both hold (either alone is sufficient).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuyReason {
    RsiOversold,
    GoldenCross,
}

impl BuyReason {
    pub fn describe(&self) -> &'static str {
        match self {
            BuyReason::RsiOversold => "RSI oversold",
            BuyReason::GoldenCross => "golden cross",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellReason {
    RsiOverbought,
    BreakoutExceeded,
    GainAboveTrigger,
    GainAboveMinimum,
}

impl SellReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SellReason::RsiOverbought => "RSI overbought",
            SellReason::BreakoutExceeded => "volatility breakout exceeded",
            SellReason::GainAboveTrigger => "gain above trigger threshold",
            SellReason::GainAboveMinimum => "gain above minimum threshold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuyEvaluation {
    /// Submit a market buy spending `notional` of the quote currency
    Order { notional: f64, reason: BuyReason },
    /// Signal fired but the sized order is below the exchange minimum.
    /// A reported skip, not an error.
    SkippedBelowNotional { notional: f64 },
    NotEligible,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SellEvaluation {
    /// Submit a market sell of `volume` of the base currency
    Order { volume: f64, reason: SellReason },
    SkippedBelowNotional { notional: f64 },
    NotEligible,
}

fn cooldown_over(last: DateTime<Utc>, now: DateTime<Utc>, cooldown_secs: i64) -> bool {
    now - last > Duration::seconds(cooldown_secs)
}

/// Seconds of sell cooldown still to wait, None when the cooldown has passed
pub fn sell_cooldown_remaining(
    state: &EngineState,
    now: DateTime<Utc>,
    cfg: &RuleConfig,
) -> Option<i64> {
    let elapsed = (now - state.last_sell_time).num_seconds();
    if elapsed <= cfg.cooldown_secs {
        Some(cfg.cooldown_secs - elapsed)
    } else {
        None
    }
}

/// Evaluate the buy rule for one cycle
///
/// All of: (RSI oversold OR golden cross), buy cooldown elapsed, no base
/// holdings, and a quote balance above the exchange minimum. The balance
/// guard is absolute: holding any base currency blocks a buy regardless of
/// the indicators.
pub fn evaluate_buy(
    ind: &IndicatorSnapshot,
    quote_balance: f64,
    base_balance: f64,
    state: &EngineState,
    now: DateTime<Utc>,
    cfg: &RuleConfig,
) -> BuyEvaluation {
    let reason = if ind.rsi < cfg.rsi_buy_threshold {
        Some(BuyReason::RsiOversold)
    } else if ind.short_ma > ind.long_ma {
        Some(BuyReason::GoldenCross)
    } else {
        None
    };

    let Some(reason) = reason else {
        return BuyEvaluation::NotEligible;
    };

    if let Some(last_buy) = state.last_buy_time {
        if !cooldown_over(last_buy, now, cfg.cooldown_secs) {
            return BuyEvaluation::NotEligible;
        }
    }

    if base_balance > 0.0 || quote_balance <= cfg.min_order_notional {
        return BuyEvaluation::NotEligible;
    }

    let notional = quote_balance * (cfg.buy_percent / 100.0);
    if notional < cfg.min_order_notional {
        return BuyEvaluation::SkippedBelowNotional { notional };
    }

    BuyEvaluation::Order { notional, reason }
}

/// Evaluate the sell rule for one cycle
///
/// Trigger: RSI overbought, price above the breakout target, or price above
/// last buy by the trigger gain. Confirmed only when the price also clears
/// the minimum gain over the last buy, the sell cooldown has elapsed and
/// there is base currency to sell. A `last_buy_price` of 0 means no
/// effective floor, so any positive price clears the gain checks.
pub fn evaluate_sell(
    ind: &IndicatorSnapshot,
    base_balance: f64,
    state: &EngineState,
    now: DateTime<Utc>,
    cfg: &RuleConfig,
) -> SellEvaluation {
    let price = ind.current_price;
    let floor = state.last_buy_price;

    // Reason order preserved from the decision rule: overbought, breakout,
    // trigger gain, minimum gain
    let reason = if ind.rsi > cfg.rsi_sell_threshold {
        Some(SellReason::RsiOverbought)
    } else if price > ind.breakout_target {
        Some(SellReason::BreakoutExceeded)
    } else if price > floor * (1.0 + cfg.sell_gain_trigger) {
        Some(SellReason::GainAboveTrigger)
    } else if price > floor * (1.0 + cfg.sell_gain_min) {
        Some(SellReason::GainAboveMinimum)
    } else {
        None
    };

    // Minimum-gain alone does not trigger; it only confirms one of the
    // three triggers below
    let reason = match reason {
        Some(
            r @ (SellReason::RsiOverbought
            | SellReason::BreakoutExceeded
            | SellReason::GainAboveTrigger),
        ) => r,
        _ => return SellEvaluation::NotEligible,
    };

    // Confirm filter: never sell below the minimum gain over the last buy
    if price <= floor * (1.0 + cfg.sell_gain_min) {
        return SellEvaluation::NotEligible;
    }

    if !cooldown_over(state.last_sell_time, now, cfg.cooldown_secs) {
        return SellEvaluation::NotEligible;
    }

    if base_balance <= 0.0 {
        return SellEvaluation::NotEligible;
    }

    let volume = base_balance * (cfg.sell_percent / 100.0);
    let notional = volume * price;
    if notional < cfg.min_order_notional {
        return SellEvaluation::SkippedBelowNotional { notional };
    }

    SellEvaluation::Order { volume, reason }
}
