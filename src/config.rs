use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::prices::{GeckoProvider, PriceProvider, YahooProvider};

pub const DEFAULT_STORE_PATH: &str = "portfolios.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProviderKind {
    /// Yahoo Finance daily closes, symbols are tickers
    #[default]
    Yahoo,
    /// CoinGecko daily USD prices, symbols are coin ids
    Gecko,
}

impl ProviderKind {
    pub fn build(self) -> Box<dyn PriceProvider> {
        match self {
            ProviderKind::Yahoo => Box::new(YahooProvider::new()),
            ProviderKind::Gecko => Box::new(GeckoProvider),
        }
    }
}

/// Settings shared by every subcommand. Each flag falls back to its
/// environment variable, which may come from a `.env` file.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Portfolio file
    #[arg(long, global = true, env = "BACKTEST_LAB_STORE", default_value = DEFAULT_STORE_PATH)]
    pub store: PathBuf,

    /// Market data source
    #[arg(long, global = true, env = "BACKTEST_LAB_PROVIDER", value_enum, default_value_t = ProviderKind::Yahoo)]
    pub provider: ProviderKind,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, env = "BACKTEST_LAB_LOG", default_value = "info")]
    pub log_level: String,
}
