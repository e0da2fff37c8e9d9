use crate::engine::RuleConfig;
use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;

/// Runtime settings, read from the environment with the defaults below.
/// Credentials are required; everything else falls back to a default.
#[derive(Debug, Clone)]
pub struct Settings {
    pub access_key: String,
    pub secret_key: String,
    /// Trading pair, quote-base (e.g. "KRW-BTC")
    pub market: String,
    pub poll_interval_secs: u64,
    /// Sleep after a failed cycle before retrying
    pub backoff_secs: u64,
    /// How often the status line is logged, independent of the poll cadence
    pub status_interval_secs: i64,
    pub candle_count: usize,
    pub rsi_period: usize,
    pub short_ma_period: usize,
    pub long_ma_period: usize,
    pub breakout_k: f64,
    pub rules: RuleConfig,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let access_key =
            std::env::var("UPBIT_ACCESS_KEY").context("UPBIT_ACCESS_KEY not set")?;
        let secret_key =
            std::env::var("UPBIT_SECRET_KEY").context("UPBIT_SECRET_KEY not set")?;

        let market = env_or("MARKET", "KRW-BTC".to_string());
        if !market.contains('-') {
            anyhow::bail!("MARKET must look like QUOTE-BASE, got {:?}", market);
        }

        let rules = RuleConfig {
            cooldown_secs: env_or("COOLDOWN_SECS", 300),
            buy_percent: env_or("BUY_PERCENT", 90.0),
            sell_percent: env_or("SELL_PERCENT", 100.0),
            min_order_notional: env_or("MIN_ORDER_NOTIONAL", 5000.0),
            rsi_buy_threshold: env_or("RSI_BUY_THRESHOLD", 30.0),
            rsi_sell_threshold: env_or("RSI_SELL_THRESHOLD", 70.0),
            sell_gain_min: env_or("SELL_GAIN_MIN", 0.005),
            sell_gain_trigger: env_or("SELL_GAIN_TRIGGER", 0.01),
        };

        Ok(Self {
            access_key,
            secret_key,
            market,
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", 10),
            backoff_secs: env_or("BACKOFF_SECS", 30),
            status_interval_secs: env_or("STATUS_INTERVAL_SECS", 100),
            candle_count: env_or("CANDLE_COUNT", 200),
            rsi_period: env_or("RSI_PERIOD", 14),
            short_ma_period: env_or("SHORT_MA_PERIOD", 5),
            long_ma_period: env_or("LONG_MA_PERIOD", 20),
            breakout_k: env_or("BREAKOUT_K", 0.5),
            rules,
            database_path: PathBuf::from(env_or("DATABASE_PATH", "data/upbitbot.db".to_string())),
            log_dir: PathBuf::from(env_or("LOG_DIR", "log".to_string())),
        })
    }

    /// The settlement currency of the pair (e.g. KRW)
    pub fn quote_currency(&self) -> &str {
        self.market.split('-').next().unwrap_or(&self.market)
    }

    /// The traded asset of the pair (e.g. BTC)
    pub fn base_currency(&self) -> &str {
        self.market.split('-').nth(1).unwrap_or(&self.market)
    }
}
