use crate::error::{Result, ScreenerError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// CONFIGURATION STRUCTS
// Defaults mirror the dashboard constants; every value can be overridden with a
// `SCREENER_*` environment variable or injected by the host as a deserialized record.

/// BIST30 constituents.
pub const DEFAULT_TICKERS: &[&str] = &[
    "AEFES.IS", "AKBNK.IS", "ASELS.IS", "ASTOR.IS", "BIMAS.IS", "CIMSA.IS", "EKGYO.IS",
    "ENKAI.IS", "EREGL.IS", "FROTO.IS", "GARAN.IS", "HEKTS.IS", "ISCTR.IS", "KCHOL.IS",
    "KOZAL.IS", "KRDMD.IS", "MGROS.IS", "PETKM.IS", "PGSUS.IS", "SAHOL.IS", "SASA.IS",
    "SISE.IS", "TAVHL.IS", "TCELL.IS", "THYAO.IS", "TOASO.IS", "TTKOM.IS", "TUPRS.IS",
    "ULKER.IS", "YKBNK.IS",
];

pub const DEFAULT_DATA_DAYS: u32 = 40;
pub const DEFAULT_WINDOW_SIZE: usize = 20;
pub const DEFAULT_TOP_N: usize = 5;
/// One hour, in seconds.
pub const DATA_CACHE_TTL: u64 = 3600;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub base_url: String,   // chart endpoint, ticker is appended as a path segment
    pub user_agent: String, // browser-like signature, the endpoint blocks bare clients
    pub lookback_days: u32,
    pub max_concurrency: usize,        // in-flight requests, e.g. 10
    pub request_timeout_secs: u64,     // per request
    pub batch_timeout_secs: Option<u64>, // whole batch, unbounded when absent
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            lookback_days: DEFAULT_DATA_DAYS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            request_timeout_secs: 15,
            batch_timeout_secs: None,
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub window_size: usize, // rolling window, in observations
    pub top_n: usize,
    pub cache_ttl_secs: u64, // price table is refetched once older than this
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            top_n: DEFAULT_TOP_N,
            cache_ttl_secs: DATA_CACHE_TTL,
        }
    }
}

impl AnalysisConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub tickers: Vec<String>,
    pub fetch: FetchConfig,
    pub analysis: AnalysisConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().map(|s| s.to_string()).collect(),
            fetch: FetchConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `SCREENER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let mut config = Self::default();

        if let Some(list) = var("SCREENER_TICKERS") {
            config.tickers = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(url) = var("SCREENER_BASE_URL") {
            config.fetch.base_url = url;
        }
        if let Some(days) = parse_var(&var, "SCREENER_LOOKBACK_DAYS")? {
            config.fetch.lookback_days = days;
        }
        if let Some(n) = parse_var(&var, "SCREENER_MAX_CONCURRENCY")? {
            config.fetch.max_concurrency = n;
        }
        if let Some(secs) = parse_var(&var, "SCREENER_REQUEST_TIMEOUT_SECS")? {
            config.fetch.request_timeout_secs = secs;
        }
        if let Some(secs) = parse_var(&var, "SCREENER_BATCH_TIMEOUT_SECS")? {
            config.fetch.batch_timeout_secs = Some(secs);
        }
        if let Some(window) = parse_var(&var, "SCREENER_WINDOW_SIZE")? {
            config.analysis.window_size = window;
        }
        if let Some(n) = parse_var(&var, "SCREENER_TOP_N")? {
            config.analysis.top_n = n;
        }
        if let Some(secs) = parse_var(&var, "SCREENER_CACHE_TTL_SECS")? {
            config.analysis.cache_ttl_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.lookback_days == 0 {
            return Err(ScreenerError::invalid("lookback_days", "must be positive"));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(ScreenerError::invalid("max_concurrency", "must be positive"));
        }
        if self.analysis.window_size < 2 {
            return Err(ScreenerError::invalid(
                "window_size",
                format!("must be at least 2, got {}", self.analysis.window_size),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, V>(var: &V, name: &'static str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| ScreenerError::invalid(name, format!("{raw:?}: {e}")))
        })
        .transpose()
}
