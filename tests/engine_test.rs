use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use upbitbot::api::UpbitClient;
use upbitbot::config::Settings;
use upbitbot::db::SqliteStore;
use upbitbot::engine::{
    decision::{evaluate_buy, evaluate_sell, BuyEvaluation, SellEvaluation},
    Engine, RuleConfig,
};
use upbitbot::logsink::LogSink;
use upbitbot::models::{IndicatorSnapshot, LedgerEntry, OrderSide};
use upbitbot::pnl::{derive_report, Reconciler};

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("upbitbot-test-{}", uuid_like()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// Unique-enough suffix without pulling uuid into dev-dependencies
fn uuid_like() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos()
}

fn test_settings(market: &str, dir: &PathBuf) -> Settings {
    Settings {
        access_key: "test-access".to_string(),
        secret_key: "test-secret".to_string(),
        market: market.to_string(),
        poll_interval_secs: 10,
        backoff_secs: 30,
        status_interval_secs: 100,
        candle_count: 200,
        rsi_period: 14,
        short_ma_period: 5,
        long_ma_period: 20,
        breakout_k: 0.5,
        rules: RuleConfig::default(),
        database_path: dir.join("upbitbot.db"),
        log_dir: dir.join("log"),
    }
}

fn snapshot(price: f64, rsi: f64) -> IndicatorSnapshot {
    IndicatorSnapshot {
        current_price: price,
        rsi,
        short_ma: price,
        long_ma: price,
        breakout_target: price * 2.0,
    }
}

#[tokio::test]
async fn test_last_buy_price_survives_restart() {
    let dir = temp_dir();
    let path = dir.join("state.db");

    {
        let store = SqliteStore::new(&path).await.unwrap();
        store.save_last_buy_price(52_000_000.0).await.unwrap();
    }

    // Fresh store over the same file simulates a process restart
    let store = SqliteStore::new(&path).await.unwrap();
    let state = store.load_state().await.unwrap();
    assert_eq!(state.last_buy_price, 52_000_000.0);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_ledger_survives_restart_and_reconciles() {
    let dir = temp_dir();
    let path = dir.join("ledger.db");
    let now = Utc::now();

    {
        let store = SqliteStore::new(&path).await.unwrap();
        store
            .insert_ledger_entry(&LedgerEntry {
                market: "KRW-BTC".to_string(),
                side: OrderSide::Bid,
                price: 100.0,
                volume: 1.0,
                total_cost: 100.0,
                trade_time: now,
            })
            .await
            .unwrap();
        store
            .insert_ledger_entry(&LedgerEntry {
                market: "KRW-BTC".to_string(),
                side: OrderSide::Ask,
                price: 110.0,
                volume: 1.0,
                total_cost: 110.0,
                trade_time: now + Duration::seconds(60),
            })
            .await
            .unwrap();
    }

    let store = SqliteStore::new(&path).await.unwrap();
    let summary = store.ledger_summary("KRW-BTC").await.unwrap();
    let report = derive_report("KRW-BTC", &summary, 110.0);

    assert_eq!(report.net_position, 0.0);
    assert_eq!(report.realized_pnl, 10.0);
    assert_eq!(report.unrealized_pnl, 0.0);
    assert_eq!(report.total_pnl, 10.0);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_bootstrap_seeds_buy_price_from_market() {
    let dir = temp_dir();
    let settings = test_settings("KRW-BTC", &dir);

    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/v1/ticker?markets=KRW-BTC")
        .with_status(200)
        .with_body(r#"[{"market":"KRW-BTC","trade_price":48000000.0}]"#)
        .create_async()
        .await;

    let client = UpbitClient::with_base_url(
        server.url(),
        settings.access_key.clone(),
        settings.secret_key.clone(),
    )
    .unwrap();
    let store = Arc::new(SqliteStore::new(&settings.database_path).await.unwrap());
    let sink = LogSink::trades(&settings.log_dir).unwrap();
    let reconciler = Reconciler::new(client.clone(), store.clone(), sink);

    let _engine = Engine::bootstrap(client, store.clone(), reconciler, settings)
        .await
        .unwrap();

    let state = store.load_state().await.unwrap();
    assert_eq!(state.last_buy_price, 48_000_000.0);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_bootstrap_never_persists_zero_price() {
    let dir = temp_dir();
    let settings = test_settings("KRW-BTC", &dir);

    // Market lookup fails on first run: the engine must start with no
    // floor and must not write a 0 price to the store
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/v1/ticker?markets=KRW-BTC")
        .with_status(500)
        .with_body("{}")
        .create_async()
        .await;

    let client = UpbitClient::with_base_url(
        server.url(),
        settings.access_key.clone(),
        settings.secret_key.clone(),
    )
    .unwrap();
    let store = Arc::new(SqliteStore::new(&settings.database_path).await.unwrap());
    let sink = LogSink::trades(&settings.log_dir).unwrap();
    let reconciler = Reconciler::new(client.clone(), store.clone(), sink);

    let _engine = Engine::bootstrap(client, store.clone(), reconciler, settings)
        .await
        .unwrap();

    let state = store.load_state().await.unwrap();
    assert_eq!(state.last_buy_price, 0.0);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_buy_then_restart_then_sell_uses_restored_floor() {
    let dir = temp_dir();
    let path = dir.join("cycle.db");
    let rules = RuleConfig::default();
    let now = Utc::now();

    // Cycle 1: oversold, flush with cash, no holdings -> buy fires
    let ind = snapshot(100_000.0, 25.0);
    let mut state = upbitbot::engine::EngineState::from_trade_state(Default::default());

    let buy = evaluate_buy(&ind, 1_000_000.0, 0.0, &state, now, &rules);
    let BuyEvaluation::Order { notional, .. } = buy else {
        panic!("expected buy order, got {:?}", buy);
    };
    assert_eq!(notional, 900_000.0);

    {
        let store = SqliteStore::new(&path).await.unwrap();
        store.save_last_buy_price(ind.current_price).await.unwrap();
    }

    // Restart: restore state from the store
    let store = SqliteStore::new(&path).await.unwrap();
    let restored = store.load_state().await.unwrap();
    state = upbitbot::engine::EngineState::from_trade_state(restored);
    assert_eq!(state.last_buy_price, 100_000.0);

    // +2% over the restored floor triggers the gain-based sell
    let later = now + Duration::seconds(600);
    let sell_ind = snapshot(102_000.0, 50.0);
    let sell = evaluate_sell(&sell_ind, 9.0, &state, later, &rules);
    assert!(matches!(sell, SellEvaluation::Order { .. }));

    // Below the minimum gain the sell must not fire, whatever the balance
    let flat_ind = snapshot(100_200.0, 50.0);
    let no_sell = evaluate_sell(&flat_ind, 9.0, &state, later, &rules);
    assert_eq!(no_sell, SellEvaluation::NotEligible);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_candle_fetch_failure_leaves_state_untouched() {
    let dir = temp_dir();
    let settings = test_settings("KRW-BTC", &dir);

    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/v1/candles/minutes/1?market=KRW-BTC&count=200")
        .with_status(500)
        .with_body("{}")
        .create_async()
        .await;

    let client = UpbitClient::with_base_url(
        server.url(),
        settings.access_key.clone(),
        settings.secret_key.clone(),
    )
    .unwrap();
    let store = SqliteStore::new(&settings.database_path).await.unwrap();
    store.save_last_buy_price(100.0).await.unwrap();

    // The fetch fails; nothing persisted may change as a result
    assert!(client.get_candles("KRW-BTC", 200).await.is_err());

    let state = store.load_state().await.unwrap();
    assert_eq!(state.last_buy_price, 100.0);
    assert_eq!(state.last_sell_time, DateTime::<Utc>::UNIX_EPOCH);
    assert!(store.ledger_by_market("KRW-BTC").await.unwrap().is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}
