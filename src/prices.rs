//! Historical daily closes from market-data services.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::{stream::FuturesUnordered, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use yahoo_finance_api::{YahooConnector, YahooError};

use crate::types::{StockData, StockPrice};

pub const MAX_SYMBOLS: usize = 10;

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("invalid price request: {0}")]
    InvalidRequest(String),
    #[error("yahoo finance: {0}")]
    Yahoo(#[from] YahooError),
    #[error("coingecko: {0}")]
    Gecko(String),
    #[error("price task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type PriceResult<T> = std::result::Result<T, PriceError>;

/// A validated fetch: trimmed non-blank symbols and an inclusive date window.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRequest {
    pub symbols: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PriceRequest {
    pub fn new<S: AsRef<str>>(symbols: &[S], start_date: &str, end_date: &str) -> PriceResult<Self> {
        if start_date.trim().is_empty() || end_date.trim().is_empty() {
            return Err(PriceError::InvalidRequest(
                "missing required parameters: symbols, startDate, endDate".into(),
            ));
        }
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if symbols.is_empty() {
            return Err(PriceError::InvalidRequest("no valid symbols provided".into()));
        }
        if symbols.len() > MAX_SYMBOLS {
            return Err(PriceError::InvalidRequest(format!(
                "maximum {MAX_SYMBOLS} symbols allowed"
            )));
        }
        let start = parse_date(start_date)?;
        let end = parse_date(end_date)?;
        if start > end {
            return Err(PriceError::InvalidRequest(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { symbols, start, end })
    }
}

fn parse_date(date: &str) -> PriceResult<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| PriceError::InvalidRequest(format!("invalid date: {date}")))
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, request: &PriceRequest) -> PriceResult<StockData>;
}

/// Turns (unix seconds, close) samples into ascending daily closes.
/// Non-finite closes are dropped; for repeated days the last sample wins.
pub fn daily_closes<I>(samples: I, start: NaiveDate, end: NaiveDate) -> Vec<StockPrice>
where
    I: IntoIterator<Item = (i64, Option<f64>)>,
{
    let mut by_day = BTreeMap::new();
    for (secs, close) in samples {
        let Some(close) = close.filter(|c| c.is_finite()) else {
            continue;
        };
        let Some(ts) = DateTime::<Utc>::from_timestamp(secs, 0) else {
            continue;
        };
        let day = ts.date_naive();
        if day < start || day > end {
            continue;
        }
        by_day.insert(day, close);
    }
    by_day
        .into_iter()
        .map(|(day, close)| StockPrice::new(day.format("%Y-%m-%d").to_string(), close))
        .collect()
}

fn midnight_utc(date: NaiveDate) -> PriceResult<OffsetDateTime> {
    let secs = date.and_time(NaiveTime::MIN).and_utc().timestamp();
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| PriceError::InvalidRequest(format!("date out of range: {e}")))
}

pub struct YahooProvider {
    client: YahooConnector,
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: YahooConnector::new(),
        }
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        request: &PriceRequest,
    ) -> PriceResult<(String, Vec<StockPrice>)> {
        let start = midnight_utc(request.start)?;
        // Yahoo's end bound is exclusive.
        let end = midnight_utc(request.end + chrono::Duration::days(1))?;
        let res = self.client.get_quote_history(symbol, start, end).await?;
        let quotes = res.quotes()?;
        let prices = daily_closes(
            quotes.iter().map(|q| (q.timestamp as i64, Some(q.close))),
            request.start,
            request.end,
        );
        tracing::debug!(symbol, quotes = quotes.len(), days = prices.len(), "yahoo history fetched");
        Ok((symbol.to_string(), prices))
    }
}

#[async_trait]
impl PriceProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch(&self, request: &PriceRequest) -> PriceResult<StockData> {
        let mut futures: FuturesUnordered<_> = request
            .symbols
            .iter()
            .map(|symbol| self.fetch_symbol(symbol, request))
            .collect();
        let mut data = StockData::new();
        while let Some(result) = futures.next().await {
            let (symbol, prices) = result?;
            data.insert(symbol, prices);
        }
        Ok(data)
    }
}

#[derive(Debug, Deserialize)]
struct MarketChart {
    #[serde(default)]
    prices: Vec<(f64, Option<f64>)>,
}

/// Converts a CoinGecko `market_chart` payload (`prices: [[ms, price], ...]`).
/// Anything unparsable yields `None`, i.e. the coin is treated as having no data.
fn parse_market_chart(json: serde_json::Value, start: NaiveDate, end: NaiveDate) -> Option<Vec<StockPrice>> {
    let chart: MarketChart = serde_json::from_value(json).ok()?;
    let samples = chart
        .prices
        .into_iter()
        .map(|(ms, price)| ((ms / 1000.0) as i64, price));
    Some(daily_closes(samples, start, end))
}

/// Symbols are CoinGecko coin ids (`bitcoin`, `ethereum`, ...) priced in USD.
#[derive(Default)]
pub struct GeckoProvider;

impl GeckoProvider {
    async fn fetch_coin(id: String, request: &PriceRequest) -> PriceResult<(String, Option<Vec<StockPrice>>)> {
        // market_chart only looks back from today.
        let days = (Utc::now().date_naive() - request.start).num_days().max(1) + 1;
        let coin = id.clone();
        let res = tokio::task::spawn_blocking(move || {
            rust_gecko::coins::market_chart(&coin, "usd", days.to_string().as_str(), Some("daily"))
        })
        .await?;
        let json = res
            .json
            .ok_or_else(|| PriceError::Gecko(format!("no data received for {id}")))?;
        let prices = parse_market_chart(json, request.start, request.end);
        if prices.is_none() {
            tracing::warn!(coin = %id, "unexpected market_chart payload");
        }
        Ok((id, prices))
    }
}

#[async_trait]
impl PriceProvider for GeckoProvider {
    fn name(&self) -> &'static str {
        "gecko"
    }

    async fn fetch(&self, request: &PriceRequest) -> PriceResult<StockData> {
        let mut futures: FuturesUnordered<_> = request
            .symbols
            .iter()
            .map(|id| Self::fetch_coin(id.clone(), request))
            .collect();
        let mut data = StockData::new();
        while let Some(result) = futures.next().await {
            if let (id, Some(prices)) = result? {
                data.insert(id, prices);
            }
        }
        Ok(data)
    }
}
