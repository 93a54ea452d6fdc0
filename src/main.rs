//! VeloBot service entrypoint
//!
//! Wires the feed, the signal monitor, and the boundary clients from
//! configuration, then runs until ctrl-c.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use velobot::advisor::AdvisorClient;
use velobot::config::AppConfig;
use velobot::execution::{ExecutionEngine, LiveExecution, SimulatedExecution};
use velobot::feed::CoinbaseFeed;
use velobot::ledger::PositionLedger;
use velobot::market::{
    AccountSource, BrokerAccount, CachedAccount, CachedSentiment, CoinbaseCandles,
    EquityContextFeed, VirtualAccount,
};
use velobot::monitor::{MonitorConfig, SignalMonitor};
use velobot::notify::WebhookNotifier;
use velobot::persistence::CsvTradeLog;
use velobot::risk::RiskGate;
use velobot::sizing::PositionSizer;
use velobot::trend::TrendFilter;
use velobot::types::ExecutionMode;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load().context("Configuration failed to load")?;
    let mode = config
        .execution_mode()
        .context("Invalid execution mode")?;
    let instruments = config.instruments()?;

    tracing::info!(config = %config.digest(), mode = %mode, "🤖 VeloBot starting");

    let monitor = Arc::new(build_monitor(&config, mode)?);

    // Feed task: connect, stream, reconnect on drop for process lifetime.
    let (tx, rx) = mpsc::channel(1024);
    let feed = CoinbaseFeed::new(config.feed.ws_url.clone(), instruments.clone());
    let reconnect_delay = Duration::from_millis(config.feed.reconnect_delay_ms);
    let feed_task = tokio::spawn(async move {
        loop {
            if let Err(e) = feed.run(tx.clone()).await {
                tracing::error!(error = %e, "Feed session failed");
            }
            tracing::info!(delay = ?reconnect_delay, "Reconnecting feed...");
            tokio::time::sleep(reconnect_delay).await;
        }
    });

    let monitor_task = tokio::spawn(monitor.clone().run(rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!(
        open_positions = monitor.ledger().open_count(),
        balance = %format!("{:.2}", monitor.ledger().balance()),
        "Shutdown signal received, stopping"
    );

    feed_task.abort();
    monitor_task.abort();
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("VELOBOT_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn build_monitor(config: &AppConfig, mode: ExecutionMode) -> Result<SignalMonitor> {
    let instruments = config.instruments()?;
    let request_timeout = Duration::from_secs(config.market_data.request_timeout_secs);

    let candles = Arc::new(CoinbaseCandles::new(
        config.market_data.candles_url.clone(),
        request_timeout,
    )?);

    let broker_timeout = Duration::from_secs(config.broker.request_timeout_secs);
    let (account_source, execution): (Arc<dyn AccountSource>, Arc<dyn ExecutionEngine>) =
        match mode {
            ExecutionMode::Simulated => (
                Arc::new(VirtualAccount {
                    balance: config.account.virtual_balance,
                    max_leverage: config.account.virtual_leverage,
                }),
                Arc::new(SimulatedExecution),
            ),
            ExecutionMode::Live => {
                config.validate_live_env()?;
                let api_key = std::env::var("BROKER_API_KEY")?;
                let api_secret = std::env::var("BROKER_API_SECRET")?;
                (
                    Arc::new(BrokerAccount::new(
                        config.broker.base_url.clone(),
                        api_key.clone(),
                        broker_timeout,
                    )?),
                    Arc::new(LiveExecution::new(
                        config.broker.base_url.clone(),
                        api_key,
                        api_secret,
                        broker_timeout,
                    )?),
                )
            }
        };
    let account = CachedAccount::new(account_source, config.account.cache_ttl_secs as i64 * 1000);

    let monitor_config = MonitorConfig {
        velocity_threshold_pct: config.monitor.velocity_threshold_pct,
        high_vol_threshold_pct: config.monitor.high_vol_threshold_pct,
        stress_relax_pct: config.monitor.stress_relax_pct,
        min_threshold_pct: config.monitor.min_threshold_pct,
        atr_period: config.sizing.atr_period,
        atr_granularity_secs: config.sizing.atr_granularity_secs,
        advisor_min_confidence: config.advisor.min_confidence,
        sweep_interval: Duration::from_secs(config.monitor.sweep_interval_secs),
        cleanup_interval: Duration::from_secs(config.monitor.cleanup_interval_secs),
    };

    let mut monitor = SignalMonitor::new(
        monitor_config,
        mode,
        instruments,
        TrendFilter::new(config.trend_config(), candles.clone()),
        RiskGate::new(config.risk_gate_config()),
        PositionSizer::new(config.sizer_config()),
        PositionLedger::new(config.ledger_config()),
        account,
        candles,
        execution,
    );

    if config.notifier.enabled {
        let notifier = WebhookNotifier::new(
            config.notifier.base_url.clone(),
            Duration::from_secs(config.notifier.request_timeout_secs),
        )?;
        monitor = monitor.with_notifier(Arc::new(notifier));
    }

    if config.sentiment.enabled {
        let api_key = std::env::var("FINNHUB_KEY")
            .context("FINNHUB_KEY must be set when sentiment is enabled")?;
        let source = Arc::new(EquityContextFeed::new(
            config.sentiment.base_url.clone(),
            api_key,
            Duration::from_secs(config.sentiment.request_timeout_secs),
        )?);
        monitor = monitor.with_sentiment(Arc::new(CachedSentiment::new(
            source,
            config.sentiment.cache_ttl_secs as i64 * 1000,
        )));
    }

    if config.advisor.enabled {
        let advisor = AdvisorClient::new(
            config.advisor.endpoint.clone(),
            Duration::from_secs(config.advisor.request_timeout_secs),
        )?;
        monitor = monitor.with_advisor(Arc::new(advisor));
    }

    if config.persistence.csv_enabled {
        monitor = monitor.with_trade_log(CsvTradeLog::new(&config.persistence.data_dir)?);
    }

    Ok(monitor)
}
