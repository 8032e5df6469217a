use anyhow::Result;
use thiserror::Error;

use crate::types::{Asset, BacktestPeriod, NewPortfolio, Portfolio, PortfolioPatch, RebalanceType};

#[derive(Debug, Error, PartialEq)]
pub enum PortfolioError {
    #[error("portfolio name must not be empty")]
    EmptyName,
    #[error("portfolio must hold at least one asset")]
    NoAssets,
    #[error("asset weights must sum to 100, got {0}")]
    WeightSum(f64),
}

impl Portfolio {
    pub fn builder() -> PortfolioBuilder {
        PortfolioBuilder::new()
    }

    pub fn total_weight(&self) -> f64 {
        total_weight(&self.assets)
    }

    pub fn validate(&self) -> std::result::Result<(), PortfolioError> {
        check(&self.name, &self.assets, self.total_weight())
    }

    /// The record `patch` would produce, rejected if it breaks the same rules
    /// a new portfolio must satisfy.
    pub fn patched(&self, patch: PortfolioPatch) -> std::result::Result<Portfolio, PortfolioError> {
        let mut candidate = self.clone();
        patch.apply(&mut candidate);
        candidate.validate()?;
        Ok(candidate)
    }
}

fn total_weight(assets: &[Asset]) -> f64 {
    assets.iter().fold(0.0, |acc, a| acc + a.weight)
}

fn check(name: &str, assets: &[Asset], total: f64) -> std::result::Result<(), PortfolioError> {
    if name.trim().is_empty() {
        return Err(PortfolioError::EmptyName);
    }
    if assets.is_empty() {
        return Err(PortfolioError::NoAssets);
    }
    if total != 100.0 {
        return Err(PortfolioError::WeightSum(total));
    }
    Ok(())
}

/// Collects a portfolio definition and validates it before it is stored.
/// The engine itself accepts any weights; this is where the sum is checked.
#[derive(Debug, Clone)]
pub struct PortfolioBuilder {
    name: String,
    description: String,
    assets: Vec<Asset>,
    rebalance_type: RebalanceType,
    backtest_period: BacktestPeriod,
}

impl Default for PortfolioBuilder {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            assets: Vec::new(),
            rebalance_type: RebalanceType::Quarterly,
            backtest_period: BacktestPeriod::default(),
        }
    }
}

impl PortfolioBuilder {
    pub fn new() -> PortfolioBuilder {
        PortfolioBuilder::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn add_asset(mut self, asset: Asset) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn remove_asset(mut self, symbol: &str) -> Self {
        self.assets.retain(|a| a.symbol != symbol);
        self
    }

    pub fn update_asset_weight(mut self, symbol: &str, weight: f64) -> Self {
        for asset in self.assets.iter_mut().filter(|a| a.symbol == symbol) {
            asset.weight = weight;
        }
        self
    }

    pub fn rebalance_type(mut self, rebalance_type: RebalanceType) -> Self {
        self.rebalance_type = rebalance_type;
        self
    }

    pub fn backtest_period(mut self, start_date: &str, end_date: &str) -> Self {
        self.backtest_period = BacktestPeriod {
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
        };
        self
    }

    pub fn total_weight(&self) -> f64 {
        total_weight(&self.assets)
    }

    pub fn validate(&self) -> std::result::Result<(), PortfolioError> {
        check(&self.name, &self.assets, self.total_weight())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    pub fn build(self) -> Result<NewPortfolio> {
        self.validate()?;
        Ok(NewPortfolio {
            name: self.name,
            description: self.description,
            assets: self.assets,
            rebalancing: self.rebalance_type,
            backtest_period: self.backtest_period,
        })
    }
}
