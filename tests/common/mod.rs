//! Shared fixtures for the integration suites: tracing setup, chart payloads
//! and mock-server backed configuration.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::sync::Once;
use tracing_subscriber::EnvFilter;
use volatility_screener::config::{AnalysisConfig, AppConfig, FetchConfig};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Ensure tracing is initialized only once across all tests
static INIT: Once = Once::new();

pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("volatility_screener=debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// 2024-03-01 07:00 UTC, a typical daily bar stamp for a UTC+3 exchange.
pub const FIRST_BAR: i64 = 1_709_276_400;
pub const DAY: i64 = 86_400;

/// Chart payload with one bar per day starting at [`FIRST_BAR`] + `offset_days`.
pub fn chart_body(offset_days: i64, closes: &[Option<f64>]) -> Value {
    let timestamps: Vec<i64> = (0..closes.len() as i64)
        .map(|i| FIRST_BAR + (offset_days + i) * DAY)
        .collect();
    json!({
        "chart": {
            "result": [{
                "meta": { "currency": "TRY", "gmtoffset": 10800 },
                "timestamp": timestamps,
                "indicators": { "quote": [{ "close": closes }] }
            }],
            "error": null
        }
    })
}

pub fn closes(values: &[f64]) -> Vec<Option<f64>> {
    values.iter().copied().map(Some).collect()
}

pub fn chart_path(ticker: &str) -> String {
    format!("/v8/finance/chart/{ticker}")
}

/// Serves `body` for `ticker`, expecting exactly `times` requests.
pub async fn mount_chart(server: &MockServer, ticker: &str, body: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(chart_path(ticker)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(times)
        .mount(server)
        .await;
}

pub fn fetch_config(server: &MockServer) -> FetchConfig {
    FetchConfig {
        base_url: format!("{}/v8/finance/chart", server.uri()),
        request_timeout_secs: 5,
        ..FetchConfig::default()
    }
}

pub fn app_config(server: &MockServer, tickers: &[&str]) -> AppConfig {
    AppConfig {
        tickers: tickers.iter().map(|s| s.to_string()).collect(),
        fetch: fetch_config(server),
        analysis: AnalysisConfig {
            window_size: 3,
            top_n: 2,
            cache_ttl_secs: 3600,
        },
    }
}
