//! Portfolio backtest engine.
//!
//! `run_backtest` is a pure function of the portfolio definition and the
//! price data handed to it. It never fails: sparse or missing data degrades
//! to a zeroed result.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};

use crate::types::{BacktestResult, Portfolio, RebalanceType, StockData, TimelinePoint};

pub const INITIAL_VALUE: f64 = 10_000.0;
pub const RISK_FREE_RATE: f64 = 0.04;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

type PriceLookup<'a> = HashMap<&'a str, HashMap<&'a str, f64>>;

pub fn run_backtest(portfolio: &Portfolio, stock_data: &StockData) -> BacktestResult {
    let symbols: Vec<&str> = portfolio.assets.iter().map(|a| a.symbol.as_str()).collect();
    let weights: Vec<f64> = portfolio.assets.iter().map(|a| a.weight / 100.0).collect();

    let dates = common_dates(&symbols, stock_data);
    if dates.len() < 2 {
        return empty_result(&portfolio.id, dates.first().copied());
    }

    let lookup = price_lookup(&symbols, stock_data);
    let rebalance_on = rebalance_dates(&dates, portfolio.rebalancing);

    let first_date = dates[0];
    let mut shares = compute_shares(&symbols, &weights, INITIAL_VALUE, &lookup, first_date);

    let mut timeline = Vec::with_capacity(dates.len());
    let mut daily_returns = Vec::with_capacity(dates.len() - 1);
    let mut peak = INITIAL_VALUE;
    let mut max_drawdown = 0.0_f64;
    let mut prev_value = INITIAL_VALUE;

    for &date in &dates {
        let value = portfolio_value(&symbols, &shares, &lookup, date);

        // a repeated first date records no return either
        if date != first_date {
            daily_returns.push((value - prev_value) / prev_value);
        }
        prev_value = value;

        if value > peak {
            peak = value;
        }
        let drawdown = (value - peak) / peak * 100.0;
        if drawdown < max_drawdown {
            max_drawdown = drawdown;
        }

        timeline.push(TimelinePoint {
            date: date.to_string(),
            value: round_to_2(value),
            drawdown: round_to_2(drawdown),
        });

        if rebalance_on.contains(date) {
            shares = compute_shares(&symbols, &weights, value, &lookup, date);
        }
    }

    let final_value = timeline.last().map_or(INITIAL_VALUE, |p| p.value);
    let stats = Statistics::compute(&daily_returns, final_value, dates.len());

    tracing::debug!(
        portfolio = %portfolio.id,
        days = dates.len(),
        rebalances = rebalance_on.len(),
        total_return = stats.total_return,
        "backtest finished"
    );

    BacktestResult {
        portfolio_id: portfolio.id.clone(),
        total_return: stats.total_return,
        annualized_return: stats.annualized_return,
        max_drawdown: round_to_2(max_drawdown),
        sharpe_ratio: stats.sharpe_ratio,
        volatility: stats.volatility,
        timeline,
    }
}

/// Dates of the first symbol's series that every other symbol also has,
/// sorted ascending. ISO dates sort correctly as strings.
pub fn common_dates<'a>(symbols: &[&str], stock_data: &'a StockData) -> Vec<&'a str> {
    let Some(first) = symbols.first() else {
        return Vec::new();
    };
    let Some(first_prices) = stock_data.get(*first) else {
        return Vec::new();
    };

    let date_sets: Vec<HashSet<&str>> = symbols
        .iter()
        .map(|s| -> HashSet<&str> {
            stock_data
                .get(*s)
                .map(|prices| prices.iter().map(|p| p.date.as_str()).collect())
                .unwrap_or_default()
        })
        .collect();

    let mut dates: Vec<&str> = first_prices
        .iter()
        .map(|p| p.date.as_str())
        .filter(|date| date_sets.iter().all(|set| set.contains(date)))
        .collect();
    dates.sort_unstable();
    dates
}

/// Dates on which holdings are reset to target weights.
///
/// Only the month of year is compared, so the distance wraps every 12
/// months and ignores the year. The first date is the starting reference
/// and never triggers a rebalance.
pub fn rebalance_dates<'a>(dates: &[&'a str], rebalancing: RebalanceType) -> HashSet<&'a str> {
    let mut out = HashSet::new();
    let Some(interval) = rebalancing.month_interval() else {
        return out;
    };

    let mut iter = dates.iter();
    let Some(first) = iter.next() else {
        return out;
    };
    // An unparsable starting date leaves no reference to measure from.
    let Some(mut last_month) = month_of(first) else {
        return out;
    };

    for &date in iter {
        let Some(month) = month_of(date) else {
            continue;
        };
        let distance = (month + 12 - last_month) % 12;
        if distance >= interval {
            out.insert(date);
            last_month = month;
        }
    }
    out
}

fn month_of(date: &str) -> Option<u32> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|d| d.month0())
}

fn price_lookup<'a>(symbols: &[&'a str], stock_data: &'a StockData) -> PriceLookup<'a> {
    symbols
        .iter()
        .map(|&symbol| {
            let prices: HashMap<&str, f64> = stock_data
                .get(symbol)
                .map(|series| series.iter().map(|p| (p.date.as_str(), p.close)).collect())
                .unwrap_or_default();
            (symbol, prices)
        })
        .collect()
}

fn price_on(lookup: &PriceLookup, symbol: &str, date: &str) -> f64 {
    lookup
        .get(symbol)
        .and_then(|prices| prices.get(date))
        .copied()
        .unwrap_or(0.0)
}

fn compute_shares(
    symbols: &[&str],
    weights: &[f64],
    portfolio_value: f64,
    lookup: &PriceLookup,
    date: &str,
) -> Vec<f64> {
    symbols
        .iter()
        .zip(weights)
        .map(|(symbol, weight)| {
            let price = price_on(lookup, symbol, date);
            if price > 0.0 {
                portfolio_value * weight / price
            } else {
                0.0
            }
        })
        .collect()
}

fn portfolio_value(symbols: &[&str], shares: &[f64], lookup: &PriceLookup, date: &str) -> f64 {
    symbols
        .iter()
        .zip(shares)
        .fold(0.0, |acc, (symbol, count)| acc + count * price_on(lookup, symbol, date))
}

fn empty_result(portfolio_id: &str, single_date: Option<&str>) -> BacktestResult {
    let timeline = single_date
        .map(|date| {
            vec![TimelinePoint {
                date: date.to_string(),
                value: INITIAL_VALUE,
                drawdown: 0.0,
            }]
        })
        .unwrap_or_default();

    BacktestResult {
        portfolio_id: portfolio_id.to_string(),
        total_return: 0.0,
        annualized_return: 0.0,
        max_drawdown: 0.0,
        sharpe_ratio: 0.0,
        volatility: 0.0,
        timeline,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Statistics {
    total_return: f64,
    annualized_return: f64,
    volatility: f64,
    sharpe_ratio: f64,
}

impl Statistics {
    fn compute(daily_returns: &[f64], final_value: f64, total_days: usize) -> Self {
        let total_return = (final_value - INITIAL_VALUE) / INITIAL_VALUE * 100.0;

        let years = total_days as f64 / TRADING_DAYS_PER_YEAR;
        let annualized_return = if years > 0.0 {
            ((final_value / INITIAL_VALUE).powf(1.0 / years) - 1.0) * 100.0
        } else {
            0.0
        };

        let n = daily_returns.len();
        let mean = if n > 0 {
            daily_returns.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let denominator = if n > 1 { (n - 1) as f64 } else { 1.0 };
        let variance = daily_returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / denominator;
        let volatility = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;

        let sharpe_ratio = if volatility > 0.0 {
            (annualized_return - RISK_FREE_RATE * 100.0) / volatility
        } else {
            0.0
        };

        Self {
            total_return: round_to_2(total_return),
            annualized_return: round_to_2(annualized_return),
            volatility: round_to_2(volatility),
            sharpe_ratio: round_to_2(sharpe_ratio),
        }
    }
}

/// Round to two decimals, ties toward positive infinity.
pub fn round_to_2(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, BacktestPeriod, StockPrice};

    fn portfolio(assets: &[(&str, f64)], rebalancing: RebalanceType) -> Portfolio {
        Portfolio {
            id: "1".into(),
            name: "Test".into(),
            description: String::new(),
            assets: assets.iter().map(|(s, w)| Asset::new(s, *w)).collect(),
            rebalancing,
            backtest_period: BacktestPeriod::default(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn series(dates: &[&str], closes: &[f64]) -> Vec<StockPrice> {
        dates
            .iter()
            .zip(closes)
            .map(|(d, c)| StockPrice::new(*d, *c))
            .collect()
    }

    const DAYS: [&str; 5] = [
        "2024-01-01",
        "2024-01-02",
        "2024-01-03",
        "2024-01-04",
        "2024-01-05",
    ];

    fn two_stock_data() -> StockData {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS, &[100.0, 102.0, 98.0, 105.0, 110.0]));
        data.insert("B".into(), series(&DAYS, &[200.0, 198.0, 210.0, 205.0, 220.0]));
        data
    }

    fn assert_two_decimals(x: f64) {
        assert!((x * 100.0 - (x * 100.0).round()).abs() < 1e-6, "{x} has more than 2 decimals");
    }

    #[test]
    fn test_two_stock_scenario() {
        let result = run_backtest(
            &portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::None),
            &two_stock_data(),
        );
        assert_eq!(result.portfolio_id, "1");
        assert_eq!(result.timeline.len(), 5);
        assert_eq!(result.timeline[0].value, 10_000.0);
        assert_eq!(result.timeline[0].drawdown, 0.0);
        assert!((result.timeline[4].value - 11_000.0).abs() < 0.5);
        assert!((result.total_return - 10.0).abs() < 0.01);
        assert!(result.max_drawdown <= 0.0);
        assert!(result.volatility >= 0.0);
    }

    #[test]
    fn test_known_values_for_two_stock_scenario() {
        let result = run_backtest(
            &portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::None),
            &two_stock_data(),
        );
        // 50 shares of A, 25 of B.
        let values: Vec<f64> = result.timeline.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10_000.0, 10_050.0, 10_150.0, 10_375.0, 11_000.0]);
        assert_eq!(result.max_drawdown, 0.0);
        assert_eq!(result.total_return, 10.0);
    }

    #[test]
    fn test_identical_returns_ignore_weights_and_rebalancing() {
        let dates = ["2024-01-31", "2024-02-01", "2024-03-01", "2024-04-01", "2024-05-01"];
        let mut data = StockData::new();
        data.insert("A".into(), series(&dates, &[10.0, 10.5, 10.2, 10.8, 11.0]));
        data.insert("B".into(), series(&dates, &[50.0, 52.5, 51.0, 54.0, 55.0]));

        assert_eq!(rebalance_dates(&dates, RebalanceType::Monthly).len(), 4);
        assert!(rebalance_dates(&dates, RebalanceType::Quarterly).contains("2024-04-01"));

        for rebalancing in [RebalanceType::None, RebalanceType::Monthly, RebalanceType::Quarterly] {
            let result = run_backtest(&portfolio(&[("A", 30.0), ("B", 70.0)], rebalancing), &data);
            assert!((result.total_return - 10.0).abs() < 0.01, "{rebalancing}: {}", result.total_return);
        }
    }

    #[test]
    fn test_repeated_first_date_records_no_return() {
        let mut data = StockData::new();
        data.insert(
            "A".into(),
            series(
                &["2024-01-01", "2024-01-01", "2024-01-02", "2024-01-03"],
                &[100.0, 100.0, 110.0, 99.0],
            ),
        );
        let result = run_backtest(&portfolio(&[("A", 100.0)], RebalanceType::None), &data);
        assert_eq!(result.timeline.len(), 4);

        let returns = [(11_000.0 - 10_000.0) / 10_000.0, (9_900.0 - 11_000.0) / 11_000.0];
        let expected = Statistics::compute(&returns, 9_900.0, 4);
        assert_eq!(result.volatility, expected.volatility);
        assert_eq!(result.sharpe_ratio, expected.sharpe_ratio);

        let with_zero = Statistics::compute(&[0.0, returns[0], returns[1]], 9_900.0, 4);
        assert_ne!(result.volatility, with_zero.volatility);
    }

    #[test]
    fn test_monotonic_series_has_zero_drawdown() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS, &[1.0, 2.0, 3.0, 4.0, 5.0]));
        let result = run_backtest(&portfolio(&[("A", 100.0)], RebalanceType::None), &data);
        assert_eq!(result.max_drawdown, 0.0);
        assert!(result.timeline.iter().all(|p| p.drawdown == 0.0));
    }

    #[test]
    fn test_drawdown_from_peak() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS[..4], &[100.0, 120.0, 90.0, 110.0]));
        let result = run_backtest(&portfolio(&[("A", 100.0)], RebalanceType::None), &data);
        assert_eq!(result.timeline[2].drawdown, -25.0);
        assert_eq!(result.max_drawdown, -25.0);
        assert_eq!(result.timeline[3].drawdown, round_to_2((11_000.0 - 12_000.0) / 12_000.0 * 100.0));
    }

    #[test]
    fn test_empty_price_data() {
        let result = run_backtest(
            &portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::Monthly),
            &StockData::new(),
        );
        assert!(result.timeline.is_empty());
        assert_eq!(result.total_return, 0.0);
        assert_eq!(result.annualized_return, 0.0);
        assert_eq!(result.max_drawdown, 0.0);
        assert_eq!(result.sharpe_ratio, 0.0);
        assert_eq!(result.volatility, 0.0);
    }

    #[test]
    fn test_no_assets() {
        let result = run_backtest(&portfolio(&[], RebalanceType::None), &two_stock_data());
        assert!(result.timeline.is_empty());
    }

    #[test]
    fn test_single_common_date() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS[..1], &[100.0]));
        let result = run_backtest(&portfolio(&[("A", 100.0)], RebalanceType::None), &data);
        assert_eq!(result.timeline.len(), 1);
        assert_eq!(result.timeline[0].date, "2024-01-01");
        assert_eq!(result.timeline[0].value, 10_000.0);
        assert_eq!(result.timeline[0].drawdown, 0.0);
        assert_eq!(result.total_return, 0.0);
    }

    #[test]
    fn test_missing_second_symbol_empties_intersection() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS, &[1.0, 2.0, 3.0, 4.0, 5.0]));
        let result = run_backtest(&portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::None), &data);
        assert!(result.timeline.is_empty());
    }

    #[test]
    fn test_only_overlapping_dates_count() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS, &[1.0, 2.0, 3.0, 4.0, 5.0]));
        data.insert("B".into(), series(&DAYS[1..4], &[2.0, 3.0, 4.0]));
        let result = run_backtest(&portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::None), &data);
        let dates: Vec<&str> = result.timeline.iter().map(|p| p.date.as_str()).collect();
        assert_eq!(dates, vec!["2024-01-02", "2024-01-03", "2024-01-04"]);
    }

    #[test]
    fn test_unsorted_input_is_aligned_ascending() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&["2024-01-03", "2024-01-01", "2024-01-02"], &[3.0, 1.0, 2.0]));
        let result = run_backtest(&portfolio(&[("A", 100.0)], RebalanceType::None), &data);
        let values: Vec<f64> = result.timeline.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![10_000.0, 20_000.0, 30_000.0]);
    }

    #[test]
    fn test_weights_are_used_literally() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS[..2], &[100.0, 110.0]));
        let result = run_backtest(&portfolio(&[("A", 50.0)], RebalanceType::None), &data);
        assert_eq!(result.timeline[0].value, 5_000.0);
        assert_eq!(result.timeline[0].drawdown, -50.0);
        assert_eq!(result.timeline[1].value, 5_500.0);
        assert_eq!(result.total_return, -45.0);
    }

    #[test]
    fn test_zero_price_contributes_nothing() {
        let mut data = StockData::new();
        data.insert("A".into(), series(&DAYS[..2], &[100.0, 110.0]));
        data.insert("B".into(), series(&DAYS[..2], &[0.0, 50.0]));
        let result = run_backtest(&portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::None), &data);
        assert_eq!(result.timeline[0].value, 5_000.0);
        assert_eq!(result.timeline[1].value, 5_500.0);
    }

    #[test]
    fn test_outputs_have_two_decimals_and_are_deterministic() {
        let data = two_stock_data();
        let p = portfolio(&[("A", 33.3), ("B", 66.7)], RebalanceType::Monthly);
        let first = run_backtest(&p, &data);
        let second = run_backtest(&p, &data);
        assert_eq!(first, second);
        for x in [
            first.total_return,
            first.annualized_return,
            first.max_drawdown,
            first.sharpe_ratio,
            first.volatility,
        ] {
            assert_two_decimals(x);
        }
        for point in &first.timeline {
            assert_two_decimals(point.value);
            assert_two_decimals(point.drawdown);
        }
    }

    #[test]
    fn test_rebalance_dates_monthly() {
        let dates = ["2024-01-02", "2024-01-15", "2024-02-01", "2024-02-20", "2024-03-01", "2024-04-01"];
        let out = rebalance_dates(&dates, RebalanceType::Monthly);
        let mut out: Vec<&str> = out.into_iter().collect();
        out.sort_unstable();
        assert_eq!(out, vec!["2024-02-01", "2024-03-01", "2024-04-01"]);
    }

    #[test]
    fn test_rebalance_dates_quarterly() {
        let dates: Vec<String> = (1..=12).map(|m| format!("2024-{m:02}-01")).collect();
        let dates: Vec<&str> = dates.iter().map(String::as_str).collect();
        let mut out: Vec<&str> = rebalance_dates(&dates, RebalanceType::Quarterly).into_iter().collect();
        out.sort_unstable();
        assert_eq!(out, vec!["2024-04-01", "2024-07-01", "2024-10-01"]);
    }

    #[test]
    fn test_rebalance_dates_semi_annually() {
        let dates: Vec<String> = (1..=12).map(|m| format!("2024-{m:02}-01")).collect();
        let dates: Vec<&str> = dates.iter().map(String::as_str).collect();
        let out: Vec<&str> = rebalance_dates(&dates, RebalanceType::SemiAnnually).into_iter().collect();
        assert_eq!(out, vec!["2024-07-01"]);

        // Sep -> Mar wraps to a distance of 6.
        let dates = ["2023-09-01", "2023-12-01", "2024-03-01"];
        let out: Vec<&str> = rebalance_dates(&dates, RebalanceType::SemiAnnually).into_iter().collect();
        assert_eq!(out, vec!["2024-03-01"]);
    }

    #[test]
    fn test_rebalance_dates_none_and_first_date() {
        let dates = ["2024-01-01", "2024-02-01"];
        assert!(rebalance_dates(&dates, RebalanceType::None).is_empty());
        assert!(!rebalance_dates(&dates, RebalanceType::Monthly).contains("2024-01-01"));
    }

    #[test]
    fn test_rebalance_distance_wraps_by_month_of_year() {
        // Annual interval needs a distance of 12, which the modulo never yields.
        let dates = ["2023-01-03", "2024-01-02", "2025-01-02"];
        assert!(rebalance_dates(&dates, RebalanceType::Annually).is_empty());
        // Nov -> Feb is a distance of 3 across the year boundary.
        let dates = ["2023-11-01", "2024-02-01"];
        assert!(rebalance_dates(&dates, RebalanceType::Quarterly).contains("2024-02-01"));
    }

    #[test]
    fn test_rebalancing_resets_shares() {
        let dates = ["2024-01-31", "2024-02-01", "2024-02-02"];
        let mut data = StockData::new();
        data.insert("A".into(), series(&dates, &[100.0, 200.0, 200.0]));
        data.insert("B".into(), series(&dates, &[100.0, 100.0, 50.0]));
        let p = portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::Monthly);
        let result = run_backtest(&p, &data);
        // Day 2 value 15000 rebalanced to 37.5 A / 75 B, day 3 = 7500 + 3750.
        assert_eq!(result.timeline[1].value, 15_000.0);
        assert_eq!(result.timeline[2].value, 11_250.0);

        let held = run_backtest(&portfolio(&[("A", 50.0), ("B", 50.0)], RebalanceType::None), &data);
        assert_eq!(held.timeline[2].value, 12_500.0);
    }

    #[test]
    fn test_statistics_single_return_uses_unit_denominator() {
        let stats = Statistics::compute(&[0.1], 11_000.0, 2);
        assert_eq!(stats.total_return, 10.0);
        assert_eq!(stats.volatility, 0.0);
        assert_eq!(stats.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_statistics_annualized_and_sharpe() {
        let returns = [0.01, -0.005, 0.02, 0.0];
        let stats = Statistics::compute(&returns, 10_252.0, 252);
        // One year of data: annualized equals total return.
        assert_eq!(stats.annualized_return, 2.52);
        assert!(stats.volatility > 0.0);
        // Below the risk-free rate.
        assert!(stats.sharpe_ratio < 0.0);
    }

    #[test]
    fn test_round_to_2() {
        assert_eq!(round_to_2(1.005_f64 + 1e-9), 1.01);
        assert_eq!(round_to_2(2.0), 2.0);
        assert_eq!(round_to_2(-0.125), -0.12);
        assert_eq!(round_to_2(10_374.999), 10_375.0);
    }
}
