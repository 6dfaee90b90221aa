//! Derived metrics over a price table: rolling volatility, N-period returns
//! and drawdown from the running peak.
//!
//! Every function here is pure; identical inputs give bit-identical outputs.

use crate::error::{Result, ScreenerError};
use crate::model::Ticker;
use crate::table::{PriceTable, VolatilityTable};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use ta::indicators::{SimpleMovingAverage, StandardDeviation};
use ta::{Next, Reset};

// --- Rolling volatility ---

/// Rolling coefficient of variation (sample std / mean) over `window` rows.
///
/// A window is complete only when it holds `window` consecutive observed
/// prices; otherwise the cell is missing. Rows missing for every ticker are
/// dropped, so the result has at most `len - window + 1` rows.
pub fn rolling_volatility(prices: &PriceTable, window: usize) -> Result<VolatilityTable> {
    if window < 2 {
        return Err(ScreenerError::invalid(
            "window",
            format!("must be at least 2, got {window}"),
        ));
    }
    if prices.len() < window {
        return Err(ScreenerError::InsufficientHistory {
            required: window,
            available: prices.len(),
        });
    }

    let mut columns = BTreeMap::new();
    for (ticker, values) in prices.columns() {
        columns.insert(ticker.clone(), rolling_cv(values, window)?);
    }

    let keep: Vec<usize> = (0..prices.len())
        .filter(|&row| columns.values().any(|c: &Vec<Option<f64>>| c[row].is_some()))
        .collect();

    let dates = keep.iter().map(|&row| prices.dates()[row]).collect();
    let columns = columns
        .into_iter()
        .map(|(ticker, column)| (ticker, keep.iter().map(|&row| column[row]).collect()))
        .collect();

    Ok(VolatilityTable::from_columns(dates, columns))
}

fn rolling_cv(values: &[Option<f64>], window: usize) -> Result<Vec<Option<f64>>> {
    let mut deviation = StandardDeviation::new(window)
        .map_err(|e| ScreenerError::invalid("window", format!("{e:?}")))?;
    let mut mean = SimpleMovingAverage::new(window)
        .map_err(|e| ScreenerError::invalid("window", format!("{e:?}")))?;

    // ta reports the population deviation; scale to the sample (n - 1) one.
    let bessel = (window as f64 / (window as f64 - 1.0)).sqrt();
    let mut run = 0usize;

    Ok(values
        .iter()
        .map(|value| match value {
            Some(price) if price.is_finite() => {
                let sd = deviation.next(*price);
                let avg = mean.next(*price);
                run += 1;
                if run < window || avg == 0.0 {
                    return None;
                }
                let cv = sd * bessel / avg;
                cv.is_finite().then_some(cv)
            }
            _ => {
                deviation.reset();
                mean.reset();
                run = 0;
                None
            }
        })
        .collect())
}

// --- Percent change ---

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Parameters for [`percent_change`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ReturnParams {
    /// Rows between the base observation and the latest one.
    pub periods: usize,
    /// Report percent (x100) instead of a fraction.
    pub as_percent: bool,
    pub sort: Option<SortOrder>,
}

impl Default for ReturnParams {
    fn default() -> Self {
        Self {
            periods: 1,
            as_percent: true,
            sort: None,
        }
    }
}

impl ReturnParams {
    pub fn over(periods: usize) -> Self {
        Self {
            periods,
            ..Self::default()
        }
    }

    pub fn sorted(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }

    pub fn fraction(mut self) -> Self {
        self.as_percent = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnEntry {
    pub ticker: Ticker,
    /// `None` when the ticker has no usable base or latest price.
    pub change: Option<f64>,
}

/// Per-ticker change between the row `periods` back and the last row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnSeries {
    pub params: ReturnParams,
    pub base_date: NaiveDate,
    pub latest_date: NaiveDate,
    pub entries: Vec<ReturnEntry>,
}

impl ReturnSeries {
    pub fn get(&self, ticker: &Ticker) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| &e.ticker == ticker)
            .and_then(|e| e.change)
    }

    /// Entries that have a value, in series order.
    pub fn values(&self) -> impl Iterator<Item = (&Ticker, f64)> {
        self.entries
            .iter()
            .filter_map(|e| e.change.map(|c| (&e.ticker, c)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `(latest - base) / base` per ticker, where base is `periods` rows earlier.
///
/// Prices are forward filled before comparing, so a ticker that did not trade
/// on the last row uses its most recent close. Fewer than `periods + 1` rows is
/// [`ScreenerError::InsufficientHistory`].
pub fn percent_change(prices: &PriceTable, params: &ReturnParams) -> Result<ReturnSeries> {
    if params.periods == 0 {
        return Err(ScreenerError::invalid("periods", "must be at least 1"));
    }
    if prices.len() < params.periods + 1 {
        return Err(ScreenerError::InsufficientHistory {
            required: params.periods + 1,
            available: prices.len(),
        });
    }

    let latest_row = prices.len() - 1;
    let base_row = latest_row - params.periods;
    let scale = if params.as_percent { 100.0 } else { 1.0 };

    let mut entries: Vec<ReturnEntry> = prices
        .columns()
        .map(|(ticker, column)| {
            let latest = last_known(column, latest_row);
            let base = last_known(column, base_row);
            let change = match (base, latest) {
                (Some(base), Some(latest)) if base != 0.0 => {
                    Some((latest - base) / base * scale)
                }
                _ => None,
            };
            ReturnEntry {
                ticker: ticker.clone(),
                change,
            }
        })
        .collect();

    if let Some(order) = params.sort {
        sort_entries(&mut entries, order);
    }

    Ok(ReturnSeries {
        params: *params,
        base_date: prices.dates()[base_row],
        latest_date: prices.dates()[latest_row],
        entries,
    })
}

fn last_known(column: &[Option<f64>], row: usize) -> Option<f64> {
    column[..=row].iter().rev().find_map(|v| *v)
}

/// Stable sort with missing values last in either direction.
fn sort_entries(entries: &mut [ReturnEntry], order: SortOrder) {
    entries.sort_by(|a, b| match (a.change, b.change) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

// --- Drawdown ---

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DrawdownPoint {
    pub date: NaiveDate,
    pub price: f64,
    /// Highest price up to and including this date.
    pub peak: f64,
    /// `(price - peak) / peak * 100`, never positive.
    pub drawdown_pct: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DrawdownSeries {
    pub ticker: Ticker,
    pub points: Vec<DrawdownPoint>,
}

impl DrawdownSeries {
    /// Deepest point; the earliest one on ties.
    pub fn max_drawdown(&self) -> Option<&DrawdownPoint> {
        self.points.iter().fold(None, |deepest, p| match deepest {
            Some(d) if d.drawdown_pct <= p.drawdown_pct => Some(d),
            _ => Some(p),
        })
    }
}

/// Drawdown of one ticker's column, skipping missing prices.
pub fn drawdown(prices: &PriceTable, ticker: &Ticker) -> Result<DrawdownSeries> {
    let observations = prices
        .observations(ticker)
        .ok_or_else(|| ScreenerError::UnknownTicker(ticker.to_string()))?;
    drawdown_from(ticker.clone(), observations)
}

/// Drawdown of an ordered `(date, price)` sequence.
///
/// Prices that are not strictly positive carry no peak to measure against and
/// are skipped like missing ones.
pub fn drawdown_from(
    ticker: Ticker,
    observations: impl IntoIterator<Item = (NaiveDate, f64)>,
) -> Result<DrawdownSeries> {
    let mut peak = f64::NEG_INFINITY;
    let points: Vec<DrawdownPoint> = observations
        .into_iter()
        .filter(|&(_, price)| price.is_finite() && price > 0.0)
        .map(|(date, price)| {
            peak = peak.max(price);
            DrawdownPoint {
                date,
                price,
                peak,
                drawdown_pct: 100.0 * (price - peak) / peak,
            }
        })
        .collect();

    if points.is_empty() {
        return Err(ScreenerError::InsufficientHistory {
            required: 1,
            available: 0,
        });
    }
    Ok(DrawdownSeries { ticker, points })
}
