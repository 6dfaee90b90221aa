//! Daily close history from the remote quote-chart service.

use crate::config::FetchConfig;
use crate::error::{FetchError, Result, ScreenerError};
use crate::model::{PricePoint, PriceSeries, Ticker};
use chrono::{DateTime, Days, FixedOffset, Local, NaiveTime, TimeZone};
use reqwest::{Client, StatusCode, Url};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

// --- Payload shape ---

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    meta: Option<ChartMeta>,
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds.
    #[serde(default)]
    gmtoffset: Option<i32>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug)]
struct Quote {
    #[serde(default)]
    close: Option<Vec<Close>>,
}

/// A close that may arrive as a number, a numeric string or `null`.
#[derive(Debug, Clone, Copy)]
struct Close(Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, a numeric string or null")
    }

    fn visit_f64<E>(self, v: f64) -> std::result::Result<Self::Value, E> {
        Ok(v.is_finite().then_some(v))
    }

    fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> std::result::Result<Self::Value, E> {
        Ok(None)
    }
}

impl<'de> Deserialize<'de> for Close {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor).map(Close)
    }
}

// --- Request window ---

/// `[start, end]` in UNIX seconds, as the chart endpoint expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: i64,
    pub end: i64,
}

impl FetchWindow {
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(ScreenerError::invalid(
                "window",
                format!("start {start} is after end {end}"),
            ));
        }
        Ok(Self { start, end })
    }

    /// From local midnight `days` days before `now`, up to `now`.
    pub fn trailing_days<Tz: TimeZone>(now: DateTime<Tz>, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(ScreenerError::invalid("lookback_days", "must be positive"));
        }
        let end = now.timestamp();
        let start_day = now
            .date_naive()
            .checked_sub_days(Days::new(u64::from(days)))
            .ok_or_else(|| {
                ScreenerError::invalid("lookback_days", "reaches before the calendar")
            })?;
        let start = start_day
            .and_time(NaiveTime::MIN)
            .and_local_timezone(now.timezone())
            .earliest()
            .map(|dt| dt.timestamp())
            .unwrap_or(end - i64::from(days) * 86_400);
        Self::new(start, end)
    }

    /// Trailing window ending at the current local time.
    pub fn trailing_days_from_now(days: u32) -> Result<Self> {
        Self::trailing_days(Local::now(), days)
    }
}

// --- Client ---

/// Result of fetching one ticker: the series, or why there is none.
#[derive(Debug)]
pub struct FetchOutcome {
    pub ticker: Ticker,
    pub result: std::result::Result<PriceSeries, FetchError>,
}

/// Owns the shared HTTP session used for every chart request.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone, Debug)]
pub struct QuoteClient {
    client: Client,
    base_url: Url,
}

impl QuoteClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ScreenerError::invalid("base_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ScreenerError::invalid("base_url", "cannot carry a path"));
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.max_concurrency)
            .build()?;

        Ok(Self { client, base_url })
    }

    fn chart_url(&self, ticker: &Ticker) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(ticker.as_str());
        }
        url
    }

    /// Fetches one ticker and logs the reason if it fails.
    pub async fn fetch(&self, ticker: Ticker, window: FetchWindow) -> FetchOutcome {
        let started = Instant::now();
        let result = self.fetch_series(&ticker, window).await;
        match &result {
            Ok(series) => debug!(
                ticker = %ticker,
                points = series.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetched price history"
            ),
            Err(error) => warn!(ticker = %ticker, %error, "could not fetch price history"),
        }
        FetchOutcome { ticker, result }
    }

    /// Issues the chart request and parses the daily closes.
    pub async fn fetch_series(
        &self,
        ticker: &Ticker,
        window: FetchWindow,
    ) -> std::result::Result<PriceSeries, FetchError> {
        let query = [
            ("period1", window.start.to_string()),
            ("period2", window.end.to_string()),
            ("interval", "1d".to_string()),
        ];

        let response = self
            .client
            .get(self.chart_url(ticker))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            return Err(FetchError::RateLimited {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        parse_chart(ticker, &body)
    }
}

/// Converts a chart payload into a daily close series.
pub fn parse_chart(
    ticker: &Ticker,
    body: &[u8],
) -> std::result::Result<PriceSeries, FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let first = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next());

    let Some(result) = first else {
        return Err(match envelope.chart.error {
            Some(err) => FetchError::Remote {
                code: err.code,
                description: err.description,
            },
            None => FetchError::Malformed("missing chart.result[0]".into()),
        });
    };

    let timestamps = result
        .timestamp
        .ok_or_else(|| FetchError::Malformed("missing chart.result[0].timestamp".into()))?;
    let closes = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .and_then(|q| q.close)
        .ok_or_else(|| {
            FetchError::Malformed("missing chart.result[0].indicators.quote[0].close".into())
        })?;

    if timestamps.len() != closes.len() {
        return Err(FetchError::Malformed(format!(
            "{} timestamps but {} closes",
            timestamps.len(),
            closes.len()
        )));
    }
    if timestamps.is_empty() {
        return Err(FetchError::Empty);
    }

    let offset_secs = result.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let offset = FixedOffset::east_opt(offset_secs)
        .ok_or_else(|| FetchError::Malformed(format!("bad gmtoffset {offset_secs}")))?;

    let points = timestamps
        .into_iter()
        .zip(closes)
        .map(|(ts, Close(close))| {
            let instant = DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| FetchError::Malformed(format!("bad timestamp {ts}")))?;
            Ok(PricePoint {
                date: instant.with_timezone(&offset).date_naive(),
                close,
            })
        })
        .collect::<std::result::Result<Vec<_>, FetchError>>()?;

    Ok(PriceSeries::from_points(ticker.clone(), points))
}
