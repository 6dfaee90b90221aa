//! Memoization of derived metrics.
//!
//! Entries are keyed by the content digest of the input table plus a typed
//! parameter record, so two tables with the same content share results no
//! matter how they were assembled. Only successful results are stored.

use crate::error::Result;
use crate::metrics::{self, DrawdownSeries, ReturnParams, ReturnSeries};
use crate::model::Ticker;
use crate::table::{PriceTable, TableDigest, VolatilityTable};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// One memo table for results of type `V` computed with parameters `P`.
pub struct Memo<P, V> {
    entries: Mutex<HashMap<(TableDigest, P), Arc<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P, V> Default for Memo<P, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<P: Hash + Eq, V> Memo<P, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<(TableDigest, P), Arc<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the stored value for the key or computes and stores it.
    ///
    /// The computation runs outside the lock; if two callers race, the first
    /// stored value wins and both receive it.
    pub fn get_or_try_insert_with<F>(
        &self,
        digest: TableDigest,
        params: P,
        compute: F,
    ) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let key = (digest, params);
        if let Some(hit) = self.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(hit));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(compute()?);
        let stored = self.lock().entry(key).or_insert(value).clone();
        Ok(stored)
    }

    /// Drops entries computed from any table other than `digest`.
    pub fn retain_table(&self, digest: TableDigest) {
        self.lock().retain(|(d, _), _| *d == digest);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }
}

/// Memoized front for the functions in [`crate::metrics`].
#[derive(Default)]
pub struct MetricsCache {
    volatility: Memo<usize, VolatilityTable>,
    returns: Memo<ReturnParams, ReturnSeries>,
    drawdowns: Memo<Ticker, DrawdownSeries>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rolling_volatility(
        &self,
        prices: &PriceTable,
        window: usize,
    ) -> Result<Arc<VolatilityTable>> {
        let digest = prices.digest();
        trace!(?digest, window, "volatility lookup");
        self.volatility
            .get_or_try_insert_with(digest, window, || metrics::rolling_volatility(prices, window))
    }

    pub fn percent_change(
        &self,
        prices: &PriceTable,
        params: &ReturnParams,
    ) -> Result<Arc<ReturnSeries>> {
        let digest = prices.digest();
        trace!(?digest, ?params, "percent change lookup");
        self.returns
            .get_or_try_insert_with(digest, *params, || metrics::percent_change(prices, params))
    }

    pub fn drawdown(&self, prices: &PriceTable, ticker: &Ticker) -> Result<Arc<DrawdownSeries>> {
        let digest = prices.digest();
        trace!(?digest, %ticker, "drawdown lookup");
        self.drawdowns
            .get_or_try_insert_with(digest, ticker.clone(), || metrics::drawdown(prices, ticker))
    }

    /// Keeps only results derived from the table with this digest.
    pub fn retain_table(&self, digest: TableDigest) {
        self.volatility.retain_table(digest);
        self.returns.retain_table(digest);
        self.drawdowns.retain_table(digest);
    }

    pub fn clear(&self) {
        self.volatility.clear();
        self.returns.clear();
        self.drawdowns.clear();
    }

    /// Totals across every metric.
    pub fn stats(&self) -> CacheStats {
        [
            self.volatility.stats(),
            self.returns.stats(),
            self.drawdowns.stats(),
        ]
        .into_iter()
        .fold(CacheStats::default(), |acc, s| CacheStats {
            hits: acc.hits + s.hits,
            misses: acc.misses + s.misses,
            entries: acc.entries + s.entries,
        })
    }
}
