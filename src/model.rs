//! Core value types: tickers and per-ticker price series.

use crate::error::{Result, ScreenerError};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

// The symbol ends up as a URL path segment, so keep it to exchange-symbol characters.
static TICKER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9.\-_=^]{1,32}$").expect("static ticker regex"));

/// Exchange-qualified instrument symbol, e.g. `THYAO.IS`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    /// Trims the raw symbol and checks it looks like an exchange symbol.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !TICKER_PATTERN.is_match(trimmed) {
            return Err(ScreenerError::InvalidTicker(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parses a list of symbols, failing on the first invalid one.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Self>> {
        raw.iter().map(|s| Self::new(s.as_ref())).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Symbol without its exchange suffix (`THYAO.IS` -> `THYAO`).
    pub fn display_name(&self) -> &str {
        match self.0.rsplit_once('.') {
            Some((symbol, _suffix)) if !symbol.is_empty() => symbol,
            _ => &self.0,
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Ticker {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ticker::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// One daily close. `close` is `None` when the source reported no price.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: Option<f64>,
}

/// Daily closes for one ticker with strictly increasing dates.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceSeries {
    ticker: Ticker,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Builds a series from points in any order.
    ///
    /// Duplicate dates collapse to the last non-missing close seen for that date.
    pub fn from_points(ticker: Ticker, points: impl IntoIterator<Item = PricePoint>) -> Self {
        let mut by_date = std::collections::BTreeMap::new();
        for point in points {
            let slot = by_date.entry(point.date).or_insert(None);
            if point.close.is_some() {
                *slot = point.close;
            }
        }
        let points = by_date
            .into_iter()
            .map(|(date, close)| PricePoint { date, close })
            .collect();
        Self { ticker, points }
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Ticker, Vec<PricePoint>) {
        (self.ticker, self.points)
    }
}
