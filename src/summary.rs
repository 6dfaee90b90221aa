//! Ranked views over the computed tables, in the shape the dashboard tables
//! and charts consume them.

use crate::error::{Result, ScreenerError};
use crate::metrics::{self, ReturnParams, ReturnSeries};
use crate::model::Ticker;
use crate::table::{PriceTable, VolatilityTable};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;

/// Rows shown in the gainers / losers lists.
pub const MOVERS_LIMIT: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedValue {
    pub ticker: Ticker,
    pub value: f64,
}

fn descending(a: &RankedValue, b: &RankedValue) -> Ordering {
    b.value.partial_cmp(&a.value).unwrap_or(Ordering::Equal)
}

/// Latest volatility per ticker, highest first, at most `n` entries.
pub fn top_volatile(vol: &VolatilityTable, n: usize) -> Vec<RankedValue> {
    let Some(last) = vol.len().checked_sub(1) else {
        return Vec::new();
    };
    let mut ranked: Vec<RankedValue> = vol
        .columns()
        .filter_map(|(ticker, column)| {
            column[last].map(|value| RankedValue {
                ticker: ticker.clone(),
                value,
            })
        })
        .collect();
    ranked.sort_by(descending);
    ranked.truncate(n);
    ranked
}

/// Mean volatility per ticker over the whole table, highest first.
pub fn average_volatility(vol: &VolatilityTable) -> Vec<RankedValue> {
    let mut ranked: Vec<RankedValue> = vol
        .columns()
        .filter_map(|(ticker, column)| {
            let observed: Vec<f64> = column.iter().flatten().copied().collect();
            if observed.is_empty() {
                return None;
            }
            Some(RankedValue {
                ticker: ticker.clone(),
                value: observed.iter().sum::<f64>() / observed.len() as f64,
            })
        })
        .collect();
    ranked.sort_by(descending);
    ranked
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MarketSummary {
    pub date: NaiveDate,
    pub advancers: usize,
    pub decliners: usize,
    pub unchanged: usize,
    pub total: usize,
    pub biggest_gain: Option<RankedValue>,
    pub biggest_loss: Option<RankedValue>,
    pub average_change: Option<f64>,
    pub most_volatile: Option<RankedValue>,
    pub top_gainers: Vec<RankedValue>,
    pub top_losers: Vec<RankedValue>,
}

/// Breadth and movers from one-period changes, plus the most volatile name.
pub fn market_summary(changes: &ReturnSeries, vol: &VolatilityTable) -> MarketSummary {
    let mut movers: Vec<RankedValue> = changes
        .values()
        .map(|(ticker, value)| RankedValue {
            ticker: ticker.clone(),
            value,
        })
        .collect();
    movers.sort_by(descending);

    let count = |f: fn(f64) -> bool| movers.iter().filter(|m| f(m.value)).count();
    let average_change = (!movers.is_empty())
        .then(|| movers.iter().map(|m| m.value).sum::<f64>() / movers.len() as f64);

    MarketSummary {
        date: changes.latest_date,
        advancers: count(|v| v > 0.0),
        decliners: count(|v| v < 0.0),
        unchanged: count(|v| v == 0.0),
        total: movers.len(),
        biggest_gain: movers.first().cloned(),
        biggest_loss: movers.last().cloned(),
        average_change,
        most_volatile: top_volatile(vol, 1).into_iter().next(),
        top_gainers: movers.iter().take(MOVERS_LIMIT).cloned().collect(),
        top_losers: movers.iter().rev().take(MOVERS_LIMIT).cloned().collect(),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskReturnPoint {
    pub ticker: Ticker,
    pub volatility: f64,
    pub return_pct: f64,
    /// Return per unit of volatility; `None` when volatility is zero.
    pub risk_adjusted: Option<f64>,
}

/// Latest volatility against the `periods`-row return, best risk-adjusted first.
pub fn risk_return(
    vol: &VolatilityTable,
    prices: &PriceTable,
    periods: usize,
) -> Result<Vec<RiskReturnPoint>> {
    let last = vol.len().checked_sub(1).ok_or(ScreenerError::InsufficientHistory {
        required: 1,
        available: 0,
    })?;
    let returns = metrics::percent_change(prices, &ReturnParams::over(periods).fraction())?;

    let mut points: Vec<RiskReturnPoint> = vol
        .columns()
        .filter_map(|(ticker, column)| {
            let volatility = column[last]?;
            let ret = returns.get(ticker)?;
            Some(RiskReturnPoint {
                ticker: ticker.clone(),
                volatility,
                return_pct: ret * 100.0,
                risk_adjusted: (volatility != 0.0).then(|| ret / volatility),
            })
        })
        .collect();

    points.sort_by(|a, b| match (a.risk_adjusted, b.risk_adjusted) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    Ok(points)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VolatileDetail {
    pub ticker: Ticker,
    pub volatility: f64,
    pub last_price: Option<f64>,
    pub change_pct: Option<f64>,
}

/// The `n` most volatile names with their last close and latest change.
pub fn volatile_detail(
    prices: &PriceTable,
    vol: &VolatilityTable,
    changes: &ReturnSeries,
    n: usize,
) -> Vec<VolatileDetail> {
    top_volatile(vol, n)
        .into_iter()
        .map(|ranked| VolatileDetail {
            last_price: prices
                .observations(&ranked.ticker)
                .and_then(|obs| obs.last())
                .map(|(_, price)| price),
            change_pct: changes.get(&ranked.ticker),
            volatility: ranked.value,
            ticker: ranked.ticker,
        })
        .collect()
}
