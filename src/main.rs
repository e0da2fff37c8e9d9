use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use upbitbot::api::UpbitClient;
use upbitbot::config::Settings;
use upbitbot::db::SqliteStore;
use upbitbot::engine::Engine;
use upbitbot::logsink::LogSink;
use upbitbot::pnl::Reconciler;
use upbitbot::wallet;

/// Upbit single-pair auto-trading bot
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Trading pair override (e.g. KRW-BTC)
    #[arg(long)]
    market: Option<String>,

    /// Print a PnL report for the market and exit
    #[arg(long)]
    report: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(market) = cli.market {
        settings.market = market;
    }

    let client = UpbitClient::new(settings.access_key.clone(), settings.secret_key.clone())
        .map_err(|e| anyhow::anyhow!(e))?;

    if let Some(parent) = settings.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteStore::new(&settings.database_path)
            .await
            .map_err(|e| anyhow::anyhow!(e))?,
    );

    let trades_sink = LogSink::trades(&settings.log_dir).map_err(|e| anyhow::anyhow!(e))?;
    let reconciler = Reconciler::new(client.clone(), store.clone(), trades_sink);

    if cli.report {
        let entries = store
            .ledger_by_market(&settings.market)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("{} ledger entries for {}", entries.len(), settings.market);

        reconciler
            .reconcile(&settings.market)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    }

    tracing::info!("upbitbot starting for {}", settings.market);

    // Startup reports are informational; failures must not stop the bot
    if let Err(e) = wallet::refresh(&client, &store, &settings).await {
        tracing::warn!("Startup wallet report failed: {}", e);
    }
    if let Err(e) = show_recent_activity(&client, &store, &settings).await {
        tracing::warn!("Recent-activity report failed: {}", e);
    }

    let mut engine = Engine::bootstrap(
        client.clone(),
        store.clone(),
        reconciler,
        settings.clone(),
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, shutting down");
        }
        _ = engine.run() => {
            tracing::error!("Trading loop exited unexpectedly");
        }
    }

    // Best-effort final reconciliation; a failure here must not break the
    // shutdown path
    let final_reconciler = Reconciler::new(
        client,
        store,
        LogSink::trades(&settings.log_dir).map_err(|e| anyhow::anyhow!(e))?,
    );
    match final_reconciler.reconcile(&settings.market).await {
        Ok(report) => tracing::info!("Final total PnL: {:.0}", report.total_pnl),
        Err(e) => tracing::warn!("Final PnL reconciliation failed: {}", e),
    }

    tracing::info!("upbitbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "upbitbot=info".to_string()),
        )
        .init();
}

/// Pull the latest public fills for the market, store them, and log the
/// most recent few
async fn show_recent_activity(
    client: &UpbitClient,
    store: &SqliteStore,
    settings: &Settings,
) -> upbitbot::Result<()> {
    let trades = client.get_recent_trades(&settings.market, 50).await?;
    store.insert_market_trades(&trades).await?;

    let recent = store.recent_market_trades(&settings.market, 10).await?;
    tracing::info!("Recent {} fills:", settings.market);
    for trade in recent {
        tracing::info!(
            "  {} {} {:.8} @ {:.0}",
            trade.trade_time.format("%Y-%m-%d %H:%M:%S"),
            trade.side.as_str(),
            trade.volume,
            trade.price
        );
    }

    Ok(())
}
