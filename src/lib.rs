//! Daily close acquisition and volatility analytics for an equity dashboard.
//!
//! Prices for a list of tickers are fetched concurrently from a quote-chart
//! endpoint, merged into one date-aligned [`PriceTable`], and turned into
//! rolling volatility, N-period returns and drawdowns.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod model;
pub mod quotes;
pub mod summary;
pub mod table;

pub use analysis::{AnalysisSession, DashboardInputs, DashboardSnapshot};
pub use cache::MetricsCache;
pub use config::AppConfig;
pub use error::{FetchError, Result, ScreenerError};
pub use fetcher::PriceFetcher;
pub use metrics::{
    DrawdownSeries, ReturnParams, ReturnSeries, SortOrder, drawdown, percent_change,
    rolling_volatility,
};
pub use model::{PricePoint, PriceSeries, Ticker};
pub use quotes::{FetchOutcome, FetchWindow, QuoteClient};
pub use table::{PriceTable, TimeTable, VolatilityTable};
