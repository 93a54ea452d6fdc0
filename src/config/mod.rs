//! Configuration management for VeloBot
//!
//! Loads defaults, then optional YAML/TOML files, then VELOBOT__*
//! environment overrides; `.env` is read first via dotenvy.

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::ledger::LedgerConfig;
use crate::risk::RiskGateConfig;
use crate::sizing::SizerConfig;
use crate::trend::TrendConfig;
use crate::types::{ExecutionMode, Instrument};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub feed: FeedConfig,
    pub monitor: MonitorCfg,
    pub trend: TrendCfg,
    pub risk: RiskCfg,
    pub sizing: SizingCfg,
    pub ledger: LedgerCfg,
    pub account: AccountCfg,
    pub market_data: MarketDataConfig,
    pub notifier: NotifierConfig,
    pub advisor: AdvisorConfig,
    pub sentiment: SentimentConfig,
    pub persistence: PersistenceConfig,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging
    pub tag: String,
    /// Instruments to monitor ("ETH", "ETH-USD", "ETH-PERP" all accepted)
    pub instruments: Vec<String>,
    /// "simulated" or "live"
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint
    pub ws_url: String,
    /// Delay before reconnecting a dropped feed, milliseconds
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorCfg {
    /// Velocity threshold over the 5-minute window, percent
    pub velocity_threshold_pct: f64,
    /// Threshold for the high-volatility allow-list, percent
    pub high_vol_threshold_pct: f64,
    /// Downward threshold relaxation under adverse sentiment, percentage points
    pub stress_relax_pct: f64,
    /// Floor the relaxed threshold never crosses, percent
    pub min_threshold_pct: f64,
    /// Evaluation sweep interval, seconds
    pub sweep_interval_secs: u64,
    /// Trade-history cleanup interval, seconds
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendCfg {
    pub sma_period: usize,
    pub granularities_secs: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskCfg {
    pub max_open_positions: usize,
    pub max_trades_per_day: usize,
    pub loss_cooldown_secs: u64,
    pub debounce_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingCfg {
    pub risk_per_trade: f64,
    pub atr_period: usize,
    /// Granularity of the candles feeding ATR, seconds
    pub atr_granularity_secs: u64,
    pub stop_atr_mult: f64,
    pub target_atr_mult: f64,
    pub margin_utilization_cap: f64,
    pub min_notional: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerCfg {
    pub initial_balance: f64,
    pub model_taker_fees: bool,
    pub taker_fee_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountCfg {
    pub cache_ttl_secs: u64,
    /// Fixed balance used in simulated mode
    pub virtual_balance: f64,
    /// Fixed leverage used in simulated mode
    pub virtual_leverage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    /// Candle REST endpoint base
    pub candles_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// Route prefix completed by the instrument slug or "system"
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvisorConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Minimum oracle confidence to execute (0-100)
    pub min_confidence: u8,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentimentConfig {
    pub enabled: bool,
    /// Quotes endpoint base
    pub base_url: String,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Order endpoint base for live mode
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from defaults, files, and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.instruments", vec!["ETH", "SOL", "XRP", "DOGE", "SUI"])?
            .set_default("bot.mode", "simulated")?
            // Feed defaults
            .set_default("feed.ws_url", "wss://advanced-trade-ws.coinbase.com")?
            .set_default("feed.reconnect_delay_ms", 5_000)?
            // Monitor defaults
            .set_default("monitor.velocity_threshold_pct", 0.8)?
            .set_default("monitor.high_vol_threshold_pct", 1.2)?
            .set_default("monitor.stress_relax_pct", 0.3)?
            .set_default("monitor.min_threshold_pct", 0.5)?
            .set_default("monitor.sweep_interval_secs", 3)?
            .set_default("monitor.cleanup_interval_secs", 600)?
            // Trend defaults
            .set_default("trend.sma_period", 200)?
            .set_default("trend.granularities_secs", vec![3_600, 14_400])?
            // Risk defaults
            .set_default("risk.max_open_positions", 3)?
            .set_default("risk.max_trades_per_day", 2)?
            .set_default("risk.loss_cooldown_secs", 10_800)?
            .set_default("risk.debounce_secs", 10_800)?
            // Sizing defaults
            .set_default("sizing.risk_per_trade", 10.0)?
            .set_default("sizing.atr_period", 14)?
            .set_default("sizing.atr_granularity_secs", 3_600)?
            .set_default("sizing.stop_atr_mult", 1.5)?
            .set_default("sizing.target_atr_mult", 3.0)?
            .set_default("sizing.margin_utilization_cap", 0.95)?
            .set_default("sizing.min_notional", 10.0)?
            // Ledger defaults
            .set_default("ledger.initial_balance", 500.0)?
            .set_default("ledger.model_taker_fees", false)?
            .set_default("ledger.taker_fee_rate", 0.0006)?
            // Account defaults
            .set_default("account.cache_ttl_secs", 30)?
            .set_default("account.virtual_balance", 500.0)?
            .set_default("account.virtual_leverage", 20.0)?
            // Market data defaults
            .set_default("market_data.candles_url", "https://api.exchange.coinbase.com")?
            .set_default("market_data.request_timeout_secs", 5)?
            // Notifier defaults
            .set_default("notifier.enabled", false)?
            .set_default(
                "notifier.base_url",
                "http://localhost:5678/webhook/futurec-trigger-",
            )?
            .set_default("notifier.request_timeout_secs", 5)?
            // Advisor defaults
            .set_default("advisor.enabled", false)?
            .set_default("advisor.endpoint", "http://localhost:3001/analyze")?
            .set_default("advisor.min_confidence", 74)?
            .set_default("advisor.request_timeout_secs", 10)?
            // Sentiment defaults
            .set_default("sentiment.enabled", false)?
            .set_default("sentiment.base_url", "https://finnhub.io/api/v1")?
            .set_default("sentiment.cache_ttl_secs", 60)?
            .set_default("sentiment.request_timeout_secs", 5)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            // Broker defaults
            .set_default("broker.base_url", "https://api.broker.example")?
            .set_default("broker.request_timeout_secs", 10)?
            // Optional config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment overrides (VELOBOT__*)
            .add_source(Environment::with_prefix("VELOBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<()> {
        if self.execution_mode().is_none() {
            bail!("bot.mode must be 'simulated' or 'live', got '{}'", self.bot.mode);
        }
        if self.instruments()?.is_empty() {
            bail!("bot.instruments must name at least one instrument");
        }
        if self.monitor.min_threshold_pct <= 0.0 {
            bail!("monitor.min_threshold_pct must be positive");
        }
        Ok(())
    }

    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        match self.bot.mode.to_lowercase().as_str() {
            "simulated" | "sim" | "paper" => Some(ExecutionMode::Simulated),
            "live" => Some(ExecutionMode::Live),
            _ => None,
        }
    }

    /// Parse the configured instrument names; unknown names fail loading
    pub fn instruments(&self) -> Result<Vec<Instrument>> {
        self.bot
            .instruments
            .iter()
            .map(|name| {
                Instrument::parse(name)
                    .with_context(|| format!("Unknown instrument '{}'", name))
            })
            .collect()
    }

    /// Required environment variables for live order submission
    pub fn validate_live_env(&self) -> Result<()> {
        for var in ["BROKER_API_KEY", "BROKER_API_SECRET"] {
            if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
                bail!("Required environment variable {} is not set", var);
            }
        }
        Ok(())
    }

    pub fn trend_config(&self) -> TrendConfig {
        TrendConfig {
            sma_period: self.trend.sma_period,
            granularities_secs: self.trend.granularities_secs.clone(),
        }
    }

    pub fn risk_gate_config(&self) -> RiskGateConfig {
        RiskGateConfig {
            max_open_positions: self.risk.max_open_positions,
            max_trades_per_day: self.risk.max_trades_per_day,
            loss_cooldown_ms: self.risk.loss_cooldown_secs as i64 * 1000,
            debounce_ms: self.risk.debounce_secs as i64 * 1000,
        }
    }

    pub fn sizer_config(&self) -> SizerConfig {
        SizerConfig {
            risk_per_trade: self.sizing.risk_per_trade,
            stop_atr_mult: self.sizing.stop_atr_mult,
            target_atr_mult: self.sizing.target_atr_mult,
            margin_utilization_cap: self.sizing.margin_utilization_cap,
            min_notional: self.sizing.min_notional,
        }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            initial_balance: self.ledger.initial_balance,
            model_taker_fees: self.ledger.model_taker_fees,
            taker_fee_rate: self.ledger.taker_fee_rate,
        }
    }

    /// One-line digest (without secrets) for startup logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} mode={} instruments={:?} risk=${:.0}/trade cap={} sweep={}s",
            self.bot.tag,
            self.bot.mode,
            self.bot.instruments,
            self.sizing.risk_per_trade,
            self.risk.max_open_positions,
            self.monitor.sweep_interval_secs
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load_and_validate() {
        let cfg = AppConfig::load().expect("defaults must load");
        assert_eq!(cfg.execution_mode(), Some(ExecutionMode::Simulated));
        assert_eq!(cfg.monitor.velocity_threshold_pct, 0.8);
        assert_eq!(cfg.monitor.high_vol_threshold_pct, 1.2);
        assert_eq!(cfg.risk.max_open_positions, 3);
        assert_eq!(cfg.sizing.risk_per_trade, 10.0);
        assert!(!cfg.ledger.model_taker_fees);

        let instruments = cfg.instruments().unwrap();
        assert!(instruments.contains(&Instrument::ETH));
        assert!(instruments.contains(&Instrument::SUI));
        assert_eq!(instruments.len(), 5);
    }

    #[test]
    fn test_mode_parsing() {
        let mut cfg = AppConfig::load().unwrap();
        cfg.bot.mode = "live".to_string();
        assert_eq!(cfg.execution_mode(), Some(ExecutionMode::Live));
        cfg.bot.mode = "paper".to_string();
        assert_eq!(cfg.execution_mode(), Some(ExecutionMode::Simulated));
        cfg.bot.mode = "yolo".to_string();
        assert_eq!(cfg.execution_mode(), None);
    }
}
