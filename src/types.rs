use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Symbol -> ascending daily closes, as returned by a price provider.
pub type StockData = HashMap<String, Vec<StockPrice>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPrice {
    pub date: String,
    pub close: f64,
}

impl StockPrice {
    pub fn new(date: impl Into<String>, close: f64) -> Self {
        Self {
            date: date.into(),
            close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Market {
    #[default]
    US,
    KR,
}

impl FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Market::US),
            "KR" => Ok(Market::KR),
            other => Err(anyhow::anyhow!("unknown market: {other}")),
        }
    }
}

/// One holding of a portfolio. `weight` is a percentage of portfolio value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub market: Market,
    pub weight: f64,
}

impl Asset {
    pub fn new(symbol: &str, weight: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            market: Market::US,
            weight,
        }
    }
}

impl FromStr for Asset {
    type Err = anyhow::Error;

    /// Parses `SYMBOL=WEIGHT` or `SYMBOL=WEIGHT:MARKET`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, rest) = s
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected SYMBOL=WEIGHT, got {s:?}"))?;
        let symbol = symbol.trim();
        if symbol.is_empty() {
            anyhow::bail!("empty symbol in {s:?}");
        }
        let (weight, market) = match rest.split_once(':') {
            Some((w, m)) => (w, m.parse()?),
            None => (rest, Market::US),
        };
        let weight: f64 = weight
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid weight in {s:?}"))?;
        Ok(Self {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            market,
            weight,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebalanceType {
    Monthly,
    #[default]
    Quarterly,
    SemiAnnually,
    Annually,
    None,
}

impl RebalanceType {
    /// Months between rebalances, `None` for buy-and-hold.
    pub fn month_interval(self) -> Option<u32> {
        match self {
            RebalanceType::Monthly => Some(1),
            RebalanceType::Quarterly => Some(3),
            RebalanceType::SemiAnnually => Some(6),
            RebalanceType::Annually => Some(12),
            RebalanceType::None => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RebalanceType::Monthly => "monthly",
            RebalanceType::Quarterly => "quarterly",
            RebalanceType::SemiAnnually => "semi-annually",
            RebalanceType::Annually => "annually",
            RebalanceType::None => "none",
        }
    }
}

impl fmt::Display for RebalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebalanceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(RebalanceType::Monthly),
            "quarterly" => Ok(RebalanceType::Quarterly),
            "semi-annually" => Ok(RebalanceType::SemiAnnually),
            "annually" => Ok(RebalanceType::Annually),
            "none" => Ok(RebalanceType::None),
            other => Err(anyhow::anyhow!("unknown rebalance type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestPeriod {
    pub start_date: String,
    pub end_date: String,
}

impl Default for BacktestPeriod {
    fn default() -> Self {
        Self {
            start_date: DEFAULT_START_DATE.to_string(),
            end_date: DEFAULT_END_DATE.to_string(),
        }
    }
}

pub const DEFAULT_START_DATE: &str = "2020-01-01";
pub const DEFAULT_END_DATE: &str = "2025-12-31";

/// A stored portfolio definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub assets: Vec<Asset>,
    pub rebalancing: RebalanceType,
    #[serde(default)]
    pub backtest_period: BacktestPeriod,
    pub created_at: String,
    pub updated_at: String,
}

impl Portfolio {
    pub fn symbols(&self) -> Vec<String> {
        self.assets.iter().map(|a| a.symbol.clone()).collect()
    }
}

/// Everything needed to create a portfolio; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPortfolio {
    pub name: String,
    pub description: String,
    pub assets: Vec<Asset>,
    pub rebalancing: RebalanceType,
    pub backtest_period: BacktestPeriod,
}

/// Partial update of a stored portfolio. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub assets: Option<Vec<Asset>>,
    pub rebalancing: Option<RebalanceType>,
    pub backtest_period: Option<BacktestPeriod>,
}

impl PortfolioPatch {
    pub fn apply(self, portfolio: &mut Portfolio) {
        if let Some(name) = self.name {
            portfolio.name = name;
        }
        if let Some(description) = self.description {
            portfolio.description = description;
        }
        if let Some(assets) = self.assets {
            portfolio.assets = assets;
        }
        if let Some(rebalancing) = self.rebalancing {
            portfolio.rebalancing = rebalancing;
        }
        if let Some(period) = self.backtest_period {
            portfolio.backtest_period = period;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: String,
    pub value: f64,
    pub drawdown: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub portfolio_id: String,
    pub total_return: f64,
    pub annualized_return: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub volatility: f64,
    pub timeline: Vec<TimelinePoint>,
}
