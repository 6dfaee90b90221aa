//! Date-indexed, ticker-columned tables.
//!
//! A [`TimeTable`] holds one column per ticker, aligned on a shared ascending
//! date index. Cells a ticker has no value for are `None` rather than a
//! fabricated number.

use crate::model::{PriceSeries, Ticker};
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Date x ticker matrix of optional values.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TimeTable {
    dates: Vec<NaiveDate>,
    columns: BTreeMap<Ticker, Vec<Option<f64>>>,
}

/// Daily closes, merged from every successfully fetched series.
pub type PriceTable = TimeTable;

/// Rolling coefficient of variation, same shape as the price table it came from.
pub type VolatilityTable = TimeTable;

impl TimeTable {
    /// Builds a table from an index and columns that already match it.
    pub(crate) fn from_columns(
        dates: Vec<NaiveDate>,
        columns: BTreeMap<Ticker, Vec<Option<f64>>>,
    ) -> Self {
        debug_assert!(dates.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(columns.values().all(|c| c.len() == dates.len()));
        Self { dates, columns }
    }

    /// Builds a table by outer-joining every series on date.
    pub fn from_series(series: impl IntoIterator<Item = PriceSeries>) -> Self {
        let mut table = Self::default();
        for s in series {
            table.merge_series(s);
        }
        table
    }

    /// Adds a series as a new column, outer-joining on date.
    ///
    /// Dates the series has that the table lacks become new rows (missing for
    /// every other ticker); dates the table has that the series lacks are
    /// missing in the new column. Merging a ticker twice replaces its column.
    pub fn merge_series(&mut self, series: PriceSeries) {
        let (ticker, points) = series.into_parts();

        let union: BTreeSet<NaiveDate> = self
            .dates
            .iter()
            .copied()
            .chain(points.iter().map(|p| p.date))
            .collect();

        if union.len() != self.dates.len() {
            let merged: Vec<NaiveDate> = union.into_iter().collect();
            for column in self.columns.values_mut() {
                *column = reindex(&self.dates, column, &merged);
            }
            self.dates = merged;
        }

        let mut column = vec![None; self.dates.len()];
        for point in points {
            if let Ok(i) = self.dates.binary_search(&point.date) {
                column[i] = point.close;
            }
        }
        self.columns.insert(ticker, column);
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Tickers in label order.
    pub fn tickers(&self) -> impl Iterator<Item = &Ticker> {
        self.columns.keys()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Ticker, &[Option<f64>])> {
        self.columns.iter().map(|(t, c)| (t, c.as_slice()))
    }

    pub fn column(&self, ticker: &Ticker) -> Option<&[Option<f64>]> {
        self.columns.get(ticker).map(Vec::as_slice)
    }

    pub fn contains(&self, ticker: &Ticker) -> bool {
        self.columns.contains_key(ticker)
    }

    pub fn value(&self, date: NaiveDate, ticker: &Ticker) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.columns.get(ticker)?[row]
    }

    /// Row `index` as a ticker -> value map; missing cells are omitted.
    pub fn row(&self, index: usize) -> Option<BTreeMap<&Ticker, f64>> {
        if index >= self.dates.len() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .filter_map(|(t, c)| c[index].map(|v| (t, v)))
                .collect(),
        )
    }

    /// Non-missing `(date, value)` pairs of one column, in date order.
    pub fn observations<'a>(
        &'a self,
        ticker: &Ticker,
    ) -> Option<impl Iterator<Item = (NaiveDate, f64)> + use<'a>> {
        let column = self.columns.get(ticker)?;
        Some(
            self.dates
                .iter()
                .zip(column)
                .filter_map(|(d, v)| v.map(|v| (*d, v))),
        )
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Number of ticker columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Content digest of the table, independent of how it was assembled.
    pub fn digest(&self) -> TableDigest {
        let mut hasher = Sha256::new();
        hasher.update((self.dates.len() as u64).to_le_bytes());
        for date in &self.dates {
            hasher.update(date.to_string().as_bytes());
        }
        for (ticker, column) in &self.columns {
            hasher.update((ticker.as_str().len() as u64).to_le_bytes());
            hasher.update(ticker.as_str().as_bytes());
            for cell in column {
                match cell {
                    Some(v) => {
                        hasher.update([1u8]);
                        hasher.update(v.to_bits().to_le_bytes());
                    }
                    None => hasher.update([0u8]),
                }
            }
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        TableDigest(bytes)
    }
}

fn reindex(
    old_dates: &[NaiveDate],
    values: &[Option<f64>],
    new_dates: &[NaiveDate],
) -> Vec<Option<f64>> {
    let mut out = vec![None; new_dates.len()];
    for (date, value) in old_dates.iter().zip(values) {
        if let Ok(i) = new_dates.binary_search(date) {
            out[i] = *value;
        }
    }
    out
}

/// SHA-256 over a table's dates, labels and cell bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableDigest([u8; 32]);

impl fmt::Debug for TableDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
