//! Batch fetch behaviour against a mock quote service.

mod common;

use chrono::NaiveDate;
use common::*;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use volatility_screener::config::FetchConfig;
use volatility_screener::{
    FetchError, FetchWindow, PriceFetcher, QuoteClient, ScreenerError, Ticker,
};
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tickers(symbols: &[&str]) -> Vec<Ticker> {
    Ticker::parse_all(symbols).unwrap()
}

#[tokio::test]
async fn every_successful_ticker_becomes_a_column() {
    init_test_env();
    let server = MockServer::start().await;
    mount_chart(&server, "AKBNK.IS", chart_body(0, &closes(&[40.0, 41.0, 42.5])), 1).await;
    mount_chart(&server, "GARAN.IS", chart_body(1, &closes(&[90.0, 91.0, 89.0])), 1).await;
    mount_chart(&server, "SISE.IS", chart_body(0, &closes(&[45.0, 44.0])), 1).await;

    let fetcher = PriceFetcher::new(&fetch_config(&server)).unwrap();
    let requested = tickers(&["AKBNK.IS", "GARAN.IS", "SISE.IS"]);
    let table = fetcher.fetch_prices(&requested, 40).await.unwrap();

    let columns: BTreeSet<&Ticker> = table.tickers().collect();
    assert_eq!(columns, requested.iter().collect());
    assert!(table.dates().windows(2).all(|w| w[0] < w[1]));

    // Mar 1..=Mar 4 local, GARAN starts a day later
    assert_eq!(table.len(), 4);
    assert_eq!(table.first_date(), NaiveDate::from_ymd_opt(2024, 3, 1));
    let garan = Ticker::new("GARAN.IS").unwrap();
    assert_eq!(table.column(&garan).unwrap()[0], None);
    assert_eq!(table.column(&garan).unwrap()[3], Some(89.0));
}

#[tokio::test]
async fn failing_tickers_are_dropped() {
    init_test_env();
    let server = MockServer::start().await;
    mount_chart(&server, "AKBNK.IS", chart_body(0, &closes(&[40.0, 41.0])), 1).await;
    Mock::given(method("GET"))
        .and(path(chart_path("BROKEN.IS")))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(chart_path("EMPTY.IS")))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("{\"chart\":{\"result\":[{}]}}"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = PriceFetcher::new(&fetch_config(&server)).unwrap();
    let table = fetcher
        .fetch_prices(&tickers(&["AKBNK.IS", "BROKEN.IS", "EMPTY.IS"]), 40)
        .await
        .unwrap();

    let columns: Vec<&str> = table.tickers().map(Ticker::as_str).collect();
    assert_eq!(columns, vec!["AKBNK.IS"]);
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn all_failures_mean_no_data() {
    init_test_env();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let fetcher = PriceFetcher::new(&fetch_config(&server)).unwrap();
    let result = fetcher.fetch_prices(&tickers(&["AAA.IS", "BBB.IS"]), 40).await;
    assert!(matches!(
        result,
        Err(ScreenerError::NoDataAvailable { requested: 2 })
    ));
}

#[tokio::test]
async fn empty_request_needs_no_network() {
    init_test_env();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = PriceFetcher::new(&fetch_config(&server)).unwrap();
    let table = fetcher.fetch_prices(&[], 40).await.unwrap();
    assert!(table.is_empty());
    assert_eq!(table.width(), 0);
}

#[tokio::test]
async fn duplicate_tickers_are_fetched_once() {
    init_test_env();
    let server = MockServer::start().await;
    mount_chart(&server, "SASA.IS", chart_body(0, &closes(&[3.0, 3.1])), 1).await;

    let fetcher = PriceFetcher::new(&fetch_config(&server)).unwrap();
    let table = fetcher
        .fetch_prices(&tickers(&["SASA.IS", " SASA.IS", "SASA.IS"]), 40)
        .await
        .unwrap();
    assert_eq!(table.width(), 1);
}

#[tokio::test]
async fn request_carries_window_interval_and_user_agent() {
    init_test_env();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(chart_path("TUPRS.IS")))
        .and(query_param("period1", "1709251200"))
        .and(query_param("period2", "1709856000"))
        .and(query_param("interval", "1d"))
        .and(header_exists("user-agent"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chart_body(0, &closes(&[150.0]))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = PriceFetcher::new(&fetch_config(&server)).unwrap();
    let window = FetchWindow::new(1_709_251_200, 1_709_856_000).unwrap();
    let table = fetcher
        .fetch_window(&tickers(&["TUPRS.IS"]), window)
        .await
        .unwrap();
    assert_eq!(table.width(), 1);
}

#[tokio::test]
async fn rate_limiting_is_reported_per_ticker() {
    init_test_env();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = QuoteClient::new(&fetch_config(&server)).unwrap();
    let window = FetchWindow::new(0, 86_400).unwrap();
    let outcome = client.fetch(Ticker::new("KCHOL.IS").unwrap(), window).await;

    assert_eq!(outcome.ticker.as_str(), "KCHOL.IS");
    assert!(matches!(
        outcome.result,
        Err(FetchError::RateLimited { status: 429 })
    ));
}

#[tokio::test]
async fn slow_ticker_times_out_without_blocking_others() {
    init_test_env();
    let server = MockServer::start().await;
    mount_chart(&server, "FAST.IS", chart_body(0, &closes(&[1.0, 2.0])), 1).await;
    Mock::given(method("GET"))
        .and(path(chart_path("SLOW.IS")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chart_body(0, &closes(&[1.0])))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&server)
        .await;

    let config = FetchConfig {
        request_timeout_secs: 1,
        ..fetch_config(&server)
    };
    let fetcher = PriceFetcher::new(&config).unwrap();
    let table = fetcher
        .fetch_prices(&tickers(&["FAST.IS", "SLOW.IS"]), 40)
        .await
        .unwrap();

    let columns: Vec<&str> = table.tickers().map(Ticker::as_str).collect();
    assert_eq!(columns, vec!["FAST.IS"]);
}

#[tokio::test]
async fn batch_deadline_returns_what_has_merged() {
    init_test_env();
    let server = MockServer::start().await;
    mount_chart(&server, "FAST.IS", chart_body(0, &closes(&[1.0, 2.0])), 1).await;
    Mock::given(method("GET"))
        .and(path(chart_path("SLOW.IS")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chart_body(0, &closes(&[1.0])))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&server)
        .await;

    let config = FetchConfig {
        batch_timeout_secs: Some(1),
        request_timeout_secs: 30,
        ..fetch_config(&server)
    };
    let fetcher = PriceFetcher::new(&config).unwrap();

    let started = std::time::Instant::now();
    let table = fetcher
        .fetch_prices(&tickers(&["FAST.IS", "SLOW.IS"]), 40)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(table.width(), 1);
    assert!(table.contains(&Ticker::new("FAST.IS").unwrap()));
}

#[tokio::test]
async fn concurrency_limit_of_one_still_fetches_everything() {
    init_test_env();
    let server = MockServer::start().await;
    let symbols = ["A1.IS", "A2.IS", "A3.IS", "A4.IS", "A5.IS"];
    for (i, symbol) in symbols.iter().enumerate() {
        mount_chart(&server, symbol, chart_body(0, &closes(&[10.0 + i as f64, 11.0])), 1).await;
    }

    let config = FetchConfig {
        max_concurrency: 1,
        ..fetch_config(&server)
    };
    let fetcher = PriceFetcher::new(&config).unwrap();
    let table = fetcher.fetch_prices(&tickers(&symbols), 40).await.unwrap();
    assert_eq!(table.width(), symbols.len());
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn in_flight_requests_never_exceed_the_limit() {
    init_test_env();
    let server = MockServer::start().await;
    let symbols = ["B1.IS", "B2.IS", "B3.IS", "B4.IS", "B5.IS", "B6.IS"];
    for symbol in symbols {
        Mock::given(method("GET"))
            .and(path(chart_path(symbol)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chart_body(0, &closes(&[5.0, 6.0])))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = FetchConfig {
        max_concurrency: 2,
        ..fetch_config(&server)
    };
    let fetcher = PriceFetcher::new(&config).unwrap();

    let started = std::time::Instant::now();
    let table = fetcher.fetch_prices(&tickers(&symbols), 40).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(table.width(), symbols.len());
    // six requests two at a time take three rounds
    assert!(elapsed >= Duration::from_millis(850), "finished in {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1700), "finished in {elapsed:?}");
}

#[tokio::test]
async fn batch_deadline_aborts_requests_still_in_flight() {
    init_test_env();
    // Accepts one connection and never answers it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (accepted_tx, accepted_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let _ = accepted_tx.send(socket);
    });

    let config = FetchConfig {
        base_url: format!("http://{addr}/v8/finance/chart"),
        request_timeout_secs: 60,
        batch_timeout_secs: Some(1),
        ..FetchConfig::default()
    };
    let fetcher = PriceFetcher::new(&config).unwrap();
    let result = fetcher.fetch_prices(&tickers(&["STUCK.IS"]), 40).await;
    assert!(matches!(
        result,
        Err(ScreenerError::NoDataAvailable { requested: 1 })
    ));

    // The aborted request drops its connection long before the request timeout.
    let mut socket = accepted_rx.await.unwrap();
    let mut received = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut received))
        .await
        .expect("connection left open after the batch deadline");
    assert!(closed.is_ok());
    assert!(received.starts_with(b"GET /v8/finance/chart/STUCK.IS"));
}
