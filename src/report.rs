use std::fs::File;
use std::path::Path;

use anyhow::Result;
use polars::prelude::*;

use crate::types::BacktestResult;

/// Equity curve as a `date | value | drawdown` frame, ready to chart.
pub fn timeline_frame(result: &BacktestResult) -> Result<DataFrame> {
    let dates: Vec<&str> = result.timeline.iter().map(|p| p.date.as_str()).collect();
    let values: Vec<f64> = result.timeline.iter().map(|p| p.value).collect();
    let drawdowns: Vec<f64> = result.timeline.iter().map(|p| p.drawdown).collect();
    Ok(df!(
        "date" => dates,
        "value" => values,
        "drawdown" => drawdowns
    )?)
}

pub fn summary_frame(result: &BacktestResult) -> Result<DataFrame> {
    let metrics = [
        "total_return",
        "annualized_return",
        "max_drawdown",
        "sharpe_ratio",
        "volatility",
    ];
    let values = [
        result.total_return,
        result.annualized_return,
        result.max_drawdown,
        result.sharpe_ratio,
        result.volatility,
    ];
    Ok(df!(
        "metric" => metrics,
        "value" => values
    )?)
}

pub fn write_timeline_csv(result: &BacktestResult, path: &Path) -> Result<()> {
    let mut df = timeline_frame(result)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    tracing::info!(path = %path.display(), rows = df.height(), "timeline written");
    Ok(())
}
