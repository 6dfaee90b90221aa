use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use volatility_screener::{AnalysisSession, AppConfig, DashboardInputs, ScreenerError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("volatility_screener=info")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let inputs = DashboardInputs::from_config(&config);
    let mut session = AnalysisSession::new(&config)?;

    info!(
        tickers = inputs.tickers.len(),
        lookback_days = inputs.lookback_days,
        window = inputs.window_size,
        "--- Running analysis ---"
    );

    let snapshot = match session.update(&inputs).await {
        Ok(snapshot) => snapshot,
        Err(ScreenerError::NoDataAvailable { requested }) => {
            warn!(requested, "nothing to display: no ticker returned data");
            return Ok(());
        }
        Err(e) => {
            error!(error = %e, "analysis failed");
            return Err(e.into());
        }
    };

    let market = &snapshot.market;
    info!(
        date = %market.date,
        advancers = market.advancers,
        decliners = market.decliners,
        unchanged = market.unchanged,
        average_change = market.average_change.unwrap_or(0.0),
        "market summary"
    );

    for (rank, row) in snapshot.volatile_detail.iter().enumerate() {
        info!(
            rank = rank + 1,
            ticker = row.ticker.display_name(),
            volatility = %format!("{:.4}", row.volatility),
            last_price = row.last_price.unwrap_or(f64::NAN),
            change_pct = %format!("{:.2}%", row.change_pct.unwrap_or(0.0)),
            "top volatile"
        );
    }

    for point in snapshot.risk_return.iter().take(inputs.top_n) {
        info!(
            ticker = point.ticker.display_name(),
            return_pct = %format!("{:.2}%", point.return_pct),
            risk_adjusted = point.risk_adjusted.unwrap_or(0.0),
            "risk/return"
        );
    }

    Ok(())
}
