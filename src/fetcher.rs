//! Concurrent download of every ticker's history into one price table.

use crate::config::FetchConfig;
use crate::error::{Result, ScreenerError};
use crate::model::Ticker;
use crate::quotes::{FetchOutcome, FetchWindow, QuoteClient};
use crate::table::PriceTable;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

/// Fans requests out over a bounded number of tasks and merges what succeeds.
#[derive(Clone, Debug)]
pub struct PriceFetcher {
    client: QuoteClient,
    max_concurrency: usize,
    batch_timeout: Option<Duration>,
}

impl PriceFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = QuoteClient::new(config)?;
        Ok(Self::with_client(client, config))
    }

    /// Reuses an existing client (and its connection pool).
    pub fn with_client(client: QuoteClient, config: &FetchConfig) -> Self {
        Self {
            client,
            max_concurrency: config.max_concurrency.max(1),
            batch_timeout: config.batch_timeout(),
        }
    }

    pub fn client(&self) -> &QuoteClient {
        &self.client
    }

    /// Fetches `lookback_days` of daily closes for every ticker.
    ///
    /// Tickers that fail are logged and left out of the table. An empty ticker
    /// list gives an empty table; a non-empty list where every fetch fails is
    /// [`ScreenerError::NoDataAvailable`].
    pub async fn fetch_prices(
        &self,
        tickers: &[Ticker],
        lookback_days: u32,
    ) -> Result<PriceTable> {
        let window = FetchWindow::trailing_days_from_now(lookback_days)?;
        self.fetch_window(tickers, window).await
    }

    /// Same as [`PriceFetcher::fetch_prices`] for an explicit window.
    ///
    /// When the batch deadline passes, fetches still in flight are aborted and
    /// count as failed.
    pub async fn fetch_window(
        &self,
        tickers: &[Ticker],
        window: FetchWindow,
    ) -> Result<PriceTable> {
        let unique: BTreeSet<Ticker> = tickers.iter().cloned().collect();
        let requested = unique.len();
        if requested == 0 {
            return Ok(PriceTable::default());
        }

        let started = std::time::Instant::now();
        let deadline = self.batch_timeout.map(|t| Instant::now() + t);

        // Each fetch runs as its own task; at most `max_concurrency` are in flight.
        let mut spawned: Vec<AbortHandle> = Vec::with_capacity(requested);
        let mut in_flight = stream::iter(unique)
            .map(|ticker| {
                let client = self.client.clone();
                let handle = tokio::spawn(async move { client.fetch(ticker, window).await });
                spawned.push(handle.abort_handle());
                handle
            })
            .buffer_unordered(self.max_concurrency);

        let mut table = PriceTable::default();
        let mut succeeded = 0usize;
        let mut expired = false;

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, in_flight.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            completed = succeeded,
                            requested, "batch deadline reached, aborting outstanding fetches"
                        );
                        expired = true;
                        break;
                    }
                },
                None => in_flight.next().await,
            };
            let Some(joined) = next else { break };

            match joined {
                Ok(FetchOutcome {
                    result: Ok(series), ..
                }) => {
                    table.merge_series(series);
                    succeeded += 1;
                }
                // already logged by the client
                Ok(FetchOutcome { result: Err(_), .. }) => {}
                Err(error) => warn!(%error, "fetch task did not complete"),
            }
        }

        // Dropping a JoinHandle detaches its task, so abort explicitly.
        drop(in_flight);
        if expired {
            spawned.iter().for_each(AbortHandle::abort);
        }

        let failed = requested - succeeded;
        info!(
            requested,
            succeeded,
            failed,
            rows = table.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "price fetch finished"
        );

        if succeeded == 0 {
            return Err(ScreenerError::NoDataAvailable { requested });
        }
        Ok(table)
    }
}
