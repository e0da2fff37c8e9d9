use crate::api::UpbitClient;
use crate::config::Settings;
use crate::db::SqliteStore;
use crate::logsink::LogSink;
use crate::models::Balance;
use crate::Result;
use std::collections::HashMap;

/// Fetch current balances, snapshot them to the store, and log a holdings
/// report valued at fresh market prices. Returns the report text.
pub async fn refresh(
    client: &UpbitClient,
    store: &SqliteStore,
    settings: &Settings,
) -> Result<String> {
    let balances = client.get_balances().await?;
    store.replace_wallet(&balances).await?;

    let report = build_report(client, &balances, settings).await;

    tracing::info!("{}", report);
    let sink = LogSink::wallet(&settings.log_dir)?;
    if let Err(e) = sink.append(&report) {
        tracing::warn!("Could not append wallet report: {}", e);
    }

    Ok(report)
}

async fn build_report(client: &UpbitClient, balances: &[Balance], settings: &Settings) -> String {
    let quote = settings.quote_currency();

    if balances.is_empty() {
        return "Wallet is empty".to_string();
    }

    let mut price_cache: HashMap<String, f64> = HashMap::new();
    let mut total_value = 0.0;
    let mut quote_value = 0.0;
    let mut lines = Vec::new();

    for asset in balances {
        if asset.currency == quote {
            quote_value += asset.balance;
            total_value += asset.balance;
            continue;
        }

        let market = format!("{}-{}", quote, asset.currency);
        let price = match price_cache.get(&market) {
            Some(&p) => p,
            None => {
                // A failed valuation lookup counts the holding at 0 rather
                // than failing the whole report
                let p = client.get_current_price(&market).await.unwrap_or(0.0);
                price_cache.insert(market.clone(), p);
                p
            }
        };

        let value = asset.balance * price;
        total_value += value;
        lines.push(format!(
            "  {} {:.8} @ {:.0} = {:.0} {}",
            asset.currency, asset.balance, price, value, quote
        ));
    }

    let quote_ratio = if total_value > 0.0 {
        quote_value / total_value * 100.0
    } else {
        0.0
    };

    let mut report = format!(
        "Wallet: {:.0} {} in cash ({:.2}%), total value {:.0} {}",
        quote_value, quote, quote_ratio, total_value, quote
    );
    for line in lines {
        report.push('\n');
        report.push_str(&line);
    }

    report
}
