use crate::api::UpbitClient;
use crate::db::{LedgerSummary, SqliteStore};
use crate::logsink::LogSink;
use crate::models::PnlReport;
use crate::Result;
use std::sync::Arc;

/// Derives realized/unrealized profit from the trade ledger.
///
/// Accounting convention: realized PnL nets all-time sell proceeds against
/// all-time buy cost. No lot matching (FIFO/LIFO) is performed.
pub struct Reconciler {
    client: UpbitClient,
    store: Arc<SqliteStore>,
    sink: LogSink,
}

impl Reconciler {
    pub fn new(client: UpbitClient, store: Arc<SqliteStore>, sink: LogSink) -> Self {
        Self { client, store, sink }
    }

    /// Aggregate the ledger for a market against the current price.
    ///
    /// Read-only over the ledger; safe to run while the decision loop keeps
    /// appending. The report is logged, appended to the trades log, and
    /// returned.
    pub async fn reconcile(&self, market: &str) -> Result<PnlReport> {
        let summary = self.store.ledger_summary(market).await?;
        let current_price = self.client.get_current_price(market).await?;

        let report = derive_report(market, &summary, current_price);
        let text = format_report(&report);

        tracing::info!("{}", text);
        if let Err(e) = self.sink.append(&text) {
            tracing::warn!("Could not append PnL report to trades log: {}", e);
        }

        Ok(report)
    }
}

/// Pure PnL derivation from ledger sums and a price
///
/// The open-position cost basis is all-time buy cost minus all-time sell
/// proceeds, floored at zero: once proceeds cover the entire buy cost the
/// remaining position carries no basis and everything above it is realized.
pub fn derive_report(market: &str, summary: &LedgerSummary, current_price: f64) -> PnlReport {
    let net_position = summary.total_bought_volume - summary.total_sold_volume;
    let current_value = net_position * current_price;

    let realized_pnl = summary.total_sell_proceeds - summary.total_buy_cost;
    let cost_basis = (summary.total_buy_cost - summary.total_sell_proceeds).max(0.0);
    let unrealized_pnl = current_value - cost_basis;

    PnlReport {
        market: market.to_string(),
        total_buy_cost: summary.total_buy_cost,
        total_sell_proceeds: summary.total_sell_proceeds,
        net_position,
        current_price,
        current_value,
        realized_pnl,
        unrealized_pnl,
        total_pnl: realized_pnl + unrealized_pnl,
    }
}

pub fn format_report(report: &PnlReport) -> String {
    format!(
        "PnL report for {}\n\
         total buy cost:      {:>16.0}\n\
         total sell proceeds: {:>16.0}\n\
         net position:        {:>16.8}\n\
         current price:       {:>16.0}\n\
         current value:       {:>16.0}\n\
         realized PnL:        {:>16.0}\n\
         unrealized PnL:      {:>16.0}\n\
         total PnL:           {:>16.0}",
        report.market,
        report.total_buy_cost,
        report.total_sell_proceeds,
        report.net_position,
        report.current_price,
        report.current_value,
        report.realized_pnl,
        report.unrealized_pnl,
        report.total_pnl
    )
}
