pub mod config;
pub mod engine;
pub mod logger;
pub mod portfolio;
pub mod prices;
pub mod report;
pub mod storage;
pub mod types;

use anyhow::Result;

use crate::prices::{PriceProvider, PriceRequest};
use crate::types::{BacktestResult, Portfolio};

pub use crate::engine::run_backtest;

/// Fetches the portfolio's price history for its backtest period and runs
/// the engine over it. Only the fetch can fail.
pub async fn backtest_portfolio(provider: &dyn PriceProvider, portfolio: &Portfolio) -> Result<BacktestResult> {
    let request = PriceRequest::new(
        &portfolio.symbols(),
        &portfolio.backtest_period.start_date,
        &portfolio.backtest_period.end_date,
    )?;
    tracing::info!(
        portfolio = %portfolio.id,
        provider = provider.name(),
        symbols = request.symbols.len(),
        start = %request.start,
        end = %request.end,
        "fetching prices"
    );
    let stock_data = provider.fetch(&request).await?;
    Ok(run_backtest(portfolio, &stock_data))
}
