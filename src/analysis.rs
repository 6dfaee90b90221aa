//! This module contains the core analysis pipeline logic.
//!
//! An [`AnalysisSession`] sits between the dashboard inputs and the engine:
//! it decides when the price table has to be fetched again and answers every
//! metric through the shared [`MetricsCache`].

use crate::cache::MetricsCache;
use crate::config::AppConfig;
use crate::error::{Result, ScreenerError};
use crate::fetcher::PriceFetcher;
use crate::metrics::{DrawdownSeries, ReturnParams, ReturnSeries, SortOrder};
use crate::model::Ticker;
use crate::summary::{self, MarketSummary, RankedValue, RiskReturnPoint, VolatileDetail};
use crate::table::{PriceTable, VolatilityTable};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What the dashboard controls hand to the engine on every interaction.
#[derive(Clone, Debug, PartialEq)]
pub struct DashboardInputs {
    pub tickers: Vec<String>,
    pub lookback_days: u32,
    pub window_size: usize,
    pub top_n: usize,
    pub refresh: bool,
}

impl DashboardInputs {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tickers: config.tickers.clone(),
            lookback_days: config.fetch.lookback_days,
            window_size: config.analysis.window_size,
            top_n: config.analysis.top_n,
            refresh: false,
        }
    }
}

/// Everything the dashboard renders for one set of inputs.
#[derive(Clone, Debug, Serialize)]
pub struct DashboardSnapshot {
    pub prices: Arc<PriceTable>,
    pub volatility: Arc<VolatilityTable>,
    pub daily_changes: Arc<ReturnSeries>,
    /// Change over `window_size` rows, most positive first. `None` when the
    /// table holds exactly `window_size` rows.
    pub window_returns: Option<Arc<ReturnSeries>>,
    pub top_volatile: Vec<RankedValue>,
    pub volatile_detail: Vec<VolatileDetail>,
    pub average_volatility: Vec<RankedValue>,
    pub market: MarketSummary,
    /// Empty whenever `window_returns` is `None`.
    pub risk_return: Vec<RiskReturnPoint>,
}

struct LoadedPrices {
    tickers: Vec<Ticker>,
    lookback_days: u32,
    fetched_at: Instant,
    prices: Arc<PriceTable>,
}

pub struct AnalysisSession {
    fetcher: PriceFetcher,
    cache: MetricsCache,
    ttl: Duration,
    loaded: Option<LoadedPrices>,
}

impl AnalysisSession {
    pub fn new(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_fetcher(
            PriceFetcher::new(&config.fetch)?,
            config.analysis.cache_ttl(),
        ))
    }

    pub fn with_fetcher(fetcher: PriceFetcher, ttl: Duration) -> Self {
        Self {
            fetcher,
            cache: MetricsCache::new(),
            ttl,
            loaded: None,
        }
    }

    pub fn cache(&self) -> &MetricsCache {
        &self.cache
    }

    /// Current price table without triggering a fetch.
    pub fn prices(&self) -> Option<Arc<PriceTable>> {
        self.loaded.as_ref().map(|l| Arc::clone(&l.prices))
    }

    fn needs_fetch(&self, tickers: &[Ticker], inputs: &DashboardInputs) -> bool {
        match &self.loaded {
            None => true,
            Some(loaded) => {
                inputs.refresh
                    || loaded.tickers != tickers
                    || loaded.lookback_days != inputs.lookback_days
                    || loaded.fetched_at.elapsed() >= self.ttl
            }
        }
    }

    /// Price table for the inputs, fetching only when the held one is stale.
    pub async fn load_prices(&mut self, inputs: &DashboardInputs) -> Result<Arc<PriceTable>> {
        if inputs.lookback_days == 0 {
            return Err(ScreenerError::invalid("lookback_days", "must be positive"));
        }
        let mut tickers = Ticker::parse_all(&inputs.tickers)?;
        tickers.sort();
        tickers.dedup();

        if !self.needs_fetch(&tickers, inputs) {
            if let Some(loaded) = &self.loaded {
                debug!(rows = loaded.prices.len(), "reusing loaded price table");
                return Ok(Arc::clone(&loaded.prices));
            }
        }

        let prices = Arc::new(self.fetcher.fetch_prices(&tickers, inputs.lookback_days).await?);
        self.cache.retain_table(prices.digest());
        info!(
            tickers = prices.width(),
            rows = prices.len(),
            lookback_days = inputs.lookback_days,
            "price table loaded"
        );

        self.loaded = Some(LoadedPrices {
            tickers,
            lookback_days: inputs.lookback_days,
            fetched_at: Instant::now(),
            prices: Arc::clone(&prices),
        });
        Ok(prices)
    }

    /// Drawdown of one ticker in the currently loaded table.
    pub fn drawdown(&self, ticker: &str) -> Result<Arc<DrawdownSeries>> {
        let ticker = Ticker::new(ticker)?;
        let loaded = self
            .loaded
            .as_ref()
            .ok_or(ScreenerError::NoDataAvailable { requested: 0 })?;
        self.cache.drawdown(&loaded.prices, &ticker)
    }

    /// Runs the full analysis pipeline:
    /// 1. Loads (or reuses) the price table.
    /// 2. Computes the rolling volatility and returns through the cache.
    /// 3. Builds the ranked views.
    pub async fn update(&mut self, inputs: &DashboardInputs) -> Result<DashboardSnapshot> {
        let prices = self.load_prices(inputs).await?;
        if prices.width() == 0 {
            return Err(ScreenerError::NoDataAvailable { requested: 0 });
        }

        let volatility = self.cache.rolling_volatility(&prices, inputs.window_size)?;
        let daily_changes = self.cache.percent_change(&prices, &ReturnParams::default())?;

        // Window returns need one row more than the volatility window.
        let window_returns = unless_short(self.cache.percent_change(
            &prices,
            &ReturnParams::over(inputs.window_size).sorted(SortOrder::Descending),
        ))?;
        let risk_return = match window_returns {
            Some(_) => summary::risk_return(&volatility, &prices, inputs.window_size)?,
            None => Vec::new(),
        };

        Ok(DashboardSnapshot {
            top_volatile: summary::top_volatile(&volatility, inputs.top_n),
            volatile_detail: summary::volatile_detail(
                &prices,
                &volatility,
                &daily_changes,
                inputs.top_n,
            ),
            average_volatility: summary::average_volatility(&volatility),
            market: summary::market_summary(&daily_changes, &volatility),
            risk_return,
            prices,
            volatility,
            daily_changes,
            window_returns,
        })
    }
}

/// Turns a too-short history into an absent view; other errors still fail.
fn unless_short<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ScreenerError::InsufficientHistory {
            required,
            available,
        }) => {
            debug!(required, available, "not enough history for window returns");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
