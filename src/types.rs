//! Core types used throughout VeloBot
//!
//! Defines common data structures for instruments, prices, positions,
//! trade history, and outbound reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monitored perpetual-futures instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instrument {
    ETH,
    SOL,
    XRP,
    DOGE,
    SUI,
    BTC,
}

impl Default for Instrument {
    fn default() -> Self {
        Instrument::ETH
    }
}

impl Instrument {
    /// All instruments the service can monitor
    pub fn all() -> &'static [Instrument] {
        &[
            Instrument::ETH,
            Instrument::SOL,
            Instrument::XRP,
            Instrument::DOGE,
            Instrument::SUI,
            Instrument::BTC,
        ]
    }

    /// Spot pair used for price lookups and market data (e.g. "ETH-USD")
    pub fn spot_pair(&self) -> &'static str {
        match self {
            Instrument::ETH => "ETH-USD",
            Instrument::SOL => "SOL-USD",
            Instrument::XRP => "XRP-USD",
            Instrument::DOGE => "DOGE-USD",
            Instrument::SUI => "SUI-USD",
            Instrument::BTC => "BTC-USD",
        }
    }

    /// Client-facing perpetual pair name (e.g. "ETH-PERP")
    pub fn perp_pair(&self) -> &'static str {
        match self {
            Instrument::ETH => "ETH-PERP",
            Instrument::SOL => "SOL-PERP",
            Instrument::XRP => "XRP-PERP",
            Instrument::DOGE => "DOGE-PERP",
            Instrument::SUI => "SUI-PERP",
            Instrument::BTC => "BTC-PERP",
        }
    }

    /// Lowercase symbol used in webhook routes (e.g. "eth")
    pub fn slug(&self) -> &'static str {
        match self {
            Instrument::ETH => "eth",
            Instrument::SOL => "sol",
            Instrument::XRP => "xrp",
            Instrument::DOGE => "doge",
            Instrument::SUI => "sui",
            Instrument::BTC => "btc",
        }
    }

    /// Parse "ETH", "ETH-USD", or "ETH-PERP". PERP-suffixed client names
    /// normalize to the same instrument as their spot equivalents.
    pub fn parse(s: &str) -> Option<Self> {
        let upper = s.to_uppercase();
        let symbol = upper
            .trim_end_matches("-PERP")
            .trim_end_matches("-USD");
        match symbol {
            "ETH" => Some(Instrument::ETH),
            "SOL" => Some(Instrument::SOL),
            "XRP" => Some(Instrument::XRP),
            "DOGE" => Some(Instrument::DOGE),
            "SUI" => Some(Instrument::SUI),
            "BTC" => Some(Instrument::BTC),
            _ => None,
        }
    }

    /// Instruments that need a wider velocity threshold before a move
    /// counts as an impulse.
    pub fn is_high_volatility(&self) -> bool {
        matches!(self, Instrument::DOGE | Instrument::SUI)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spot_pair())
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for longs, -1.0 for shorts; multiplies price differences
    /// into signed PnL.
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Execution mode selected once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Simulated,
    Live,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Simulated => write!(f, "SIM"),
            ExecutionMode::Live => write!(f, "LIVE"),
        }
    }
}

/// Single price observation, stamped on receipt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    /// Receive timestamp in milliseconds
    pub ts: i64,
    pub price: f64,
}

/// OHLCV candle fetched on demand from the market-data provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time (start of period) in milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One open bracketed trade. Lifecycle owner is the position ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Order id assigned at fill time
    pub id: String,
    pub instrument: Instrument,
    pub side: Side,
    pub entry_price: f64,
    /// Whole contracts, never zero
    pub contracts: u32,
    pub stop_price: f64,
    pub target_price: f64,
    /// Margin locked for this position (USD)
    pub margin: f64,
    /// Open timestamp in milliseconds
    pub opened_at: i64,
    pub mode: ExecutionMode,
    /// Recomputed on every evaluation sweep
    pub unrealized_pnl: f64,
}

/// Trade result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    Pending,
    Win,
    Loss,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeResult::Pending => write!(f, "PENDING"),
            TradeResult::Win => write!(f, "WIN"),
            TradeResult::Loss => write!(f, "LOSS"),
        }
    }
}

/// Historical trade outcome. Drives the rolling 24-hour trade-count and
/// post-loss cooldown rules; pruned once older than 24 hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub order_id: String,
    pub instrument: Instrument,
    pub side: Side,
    /// Open timestamp in milliseconds
    pub opened_at: i64,
    /// Close timestamp in milliseconds (0 while pending)
    pub closed_at: i64,
    pub result: TradeResult,
    /// Realized PnL in USD (0 while pending)
    pub pnl: f64,
}

/// Report event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportEvent {
    Open,
    Close,
}

/// Outbound notification sent to the automation layer on position
/// open and close. Delivery is best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReport {
    pub instrument: String,
    pub side: Side,
    pub event: ReportEvent,
    pub entry_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    pub stop_price: f64,
    pub target_price: f64,
    pub contracts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TradeResult>,
    /// Milliseconds since epoch
    pub timestamp: i64,
}

/// Structured outcome of an admission gate (trend filter, risk gate).
/// Rejections carry a human-readable reason; never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate equity-market sentiment from the external context source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketSentiment {
    Neutral,
    Bullish,
    Bearish,
    CrashWarning,
}

impl Default for MarketSentiment {
    fn default() -> Self {
        MarketSentiment::Neutral
    }
}

impl MarketSentiment {
    /// Broad-market stress states that relax the drop threshold
    pub fn is_adverse(&self) -> bool {
        matches!(
            self,
            MarketSentiment::Bearish | MarketSentiment::CrashWarning
        )
    }
}

impl fmt::Display for MarketSentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketSentiment::Neutral => write!(f, "NEUTRAL"),
            MarketSentiment::Bullish => write!(f, "BULLISH"),
            MarketSentiment::Bearish => write!(f, "BEARISH"),
            MarketSentiment::CrashWarning => write!(f, "CRASH_WARNING"),
        }
    }
}

/// Current wall-clock time in milliseconds since epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Format a millisecond timestamp for log output
pub fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}
