//! Signal monitor - the orchestrator
//!
//! Consumes feed ticks, detects velocity impulses, walks candidates
//! through the advisor, trend filter, risk gate, and sizer, and commits
//! fills to the ledger. A periodic sweep resolves open positions
//! against their brackets and reports closes.
//!
//! Per instrument the flow is an implicit state machine:
//! idle -> candidate (threshold crossed) -> filtered -> sized -> open,
//! returning to idle when the ledger resolves the position.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

use crate::advisor::{Advisor, AdvisorSignal, MarketSnapshot};
use crate::execution::{ExecutionEngine, OrderRequest};
use crate::feed::{FeedEvent, PriceFeedCache};
use crate::indicators::{atr, velocity_pct};
use crate::ledger::{ClosedPosition, PositionLedger};
use crate::market::{CachedAccount, CachedSentiment, CandleSource};
use crate::notify::WebhookNotifier;
use crate::persistence::CsvTradeLog;
use crate::risk::RiskGate;
use crate::sizing::{PositionSizer, SizeRequest};
use crate::trend::TrendFilter;
use crate::types::{
    now_ms, ExecutionMode, Instrument, MarketSentiment, Position, ReportEvent, Side,
    SignalReport,
};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Velocity threshold over the rolling window, percent
    pub velocity_threshold_pct: f64,
    /// Threshold for high-volatility instruments, percent
    pub high_vol_threshold_pct: f64,
    /// Downward relaxation under adverse sentiment, percentage points
    pub stress_relax_pct: f64,
    /// Relaxed threshold never drops below this, percent
    pub min_threshold_pct: f64,
    /// Candle period feeding the ATR
    pub atr_period: usize,
    /// Granularity of ATR candles, seconds
    pub atr_granularity_secs: u64,
    /// Minimum advisor confidence to execute (0-100)
    pub advisor_min_confidence: u8,
    pub sweep_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            velocity_threshold_pct: 0.8,
            high_vol_threshold_pct: 1.2,
            stress_relax_pct: 0.3,
            min_threshold_pct: 0.5,
            atr_period: 14,
            atr_granularity_secs: 3_600,
            advisor_min_confidence: 74,
            sweep_interval: Duration::from_secs(3),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

/// A velocity move that crossed its threshold
#[derive(Debug, Clone, Copy)]
struct Impulse {
    instrument: Instrument,
    price: f64,
    velocity: f64,
    side: Side,
    sentiment: MarketSentiment,
}

pub struct SignalMonitor {
    config: MonitorConfig,
    mode: ExecutionMode,
    instruments: Vec<Instrument>,
    feed: RwLock<PriceFeedCache>,
    trend: TrendFilter,
    gate: RiskGate,
    sizer: PositionSizer,
    ledger: PositionLedger,
    account: CachedAccount,
    atr_candles: Arc<dyn CandleSource>,
    execution: Arc<dyn ExecutionEngine>,
    notifier: Option<Arc<WebhookNotifier>>,
    sentiment: Option<Arc<CachedSentiment>>,
    advisor: Option<Arc<dyn Advisor>>,
    trade_log: Option<CsvTradeLog>,
}

impl SignalMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MonitorConfig,
        mode: ExecutionMode,
        instruments: Vec<Instrument>,
        trend: TrendFilter,
        gate: RiskGate,
        sizer: PositionSizer,
        ledger: PositionLedger,
        account: CachedAccount,
        atr_candles: Arc<dyn CandleSource>,
        execution: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            config,
            mode,
            instruments,
            feed: RwLock::new(PriceFeedCache::new()),
            trend,
            gate,
            sizer,
            ledger,
            account,
            atr_candles,
            execution,
            notifier: None,
            sentiment: None,
            advisor: None,
            trade_log: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<WebhookNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_sentiment(mut self, sentiment: Arc<CachedSentiment>) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_trade_log(mut self, trade_log: CsvTradeLog) -> Self {
        self.trade_log = Some(trade_log);
        self
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    // ── Event loop ──────────────────────────────────────────────

    /// Drive the monitor from a feed event channel until it closes.
    pub async fn run(self: Arc<Self>, mut events: Receiver<FeedEvent>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);

        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(FeedEvent::Tick { instrument, price, ts }) => {
                            self.on_tick(instrument, price, ts).await;
                        }
                        Some(FeedEvent::Connected) => {
                            tracing::info!("Feed connected");
                        }
                        Some(FeedEvent::Disconnected) => {
                            tracing::warn!("Feed disconnected");
                        }
                        Some(FeedEvent::Error(e)) => {
                            tracing::error!(error = %e, "Feed error");
                        }
                        None => {
                            tracing::info!("Feed channel closed, monitor stopping");
                            return;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.evaluate_sweep().await;
                }
                _ = cleanup.tick() => {
                    self.ledger.prune_history(now_ms());
                }
            }
        }
    }

    // ── Tick handling ───────────────────────────────────────────

    /// Record a price and run the velocity check in the same update.
    pub async fn on_tick(&self, instrument: Instrument, price: f64, ts: i64) {
        self.feed
            .write()
            .unwrap()
            .record_tick(instrument, price, ts);

        let impulse = match self.detect_impulse(instrument, price).await {
            Some(i) => i,
            None => return,
        };

        if !self.gate.debounce(instrument, ts) {
            // Dropped silently: logged, never reported outward.
            tracing::debug!(
                instrument = %instrument,
                velocity = %format!("{:+.2}%", impulse.velocity),
                "Impulse ignored, still in debounce window"
            );
            return;
        }

        tracing::info!(
            instrument = %instrument,
            velocity = %format!("{:+.2}%", impulse.velocity),
            price,
            sentiment = %impulse.sentiment,
            "🚀 Velocity impulse detected"
        );

        self.try_open(impulse).await;
    }

    /// Compare the window move against the dynamic threshold.
    async fn detect_impulse(&self, instrument: Instrument, price: f64) -> Option<Impulse> {
        let oldest = {
            let feed = self.feed.read().unwrap();
            if feed.sample_count(instrument) < 2 {
                return None;
            }
            feed.oldest_in_window(instrument)?
        };

        let velocity = velocity_pct(oldest.price, price);
        let sentiment = match &self.sentiment {
            Some(s) => s.current().await,
            None => MarketSentiment::Neutral,
        };

        let threshold = self.threshold_for(instrument, velocity, sentiment);
        if velocity.abs() < threshold {
            return None;
        }

        let side = if velocity >= 0.0 { Side::Long } else { Side::Short };
        Some(Impulse {
            instrument,
            price,
            velocity,
            side,
            sentiment,
        })
    }

    /// Base threshold per instrument, relaxed for drops during
    /// broad-market stress. Asymmetric on purpose: only downside moves
    /// get the relaxed threshold, and only under an adverse tape.
    fn threshold_for(
        &self,
        instrument: Instrument,
        velocity: f64,
        sentiment: MarketSentiment,
    ) -> f64 {
        let mut threshold = if instrument.is_high_volatility() {
            self.config.high_vol_threshold_pct
        } else {
            self.config.velocity_threshold_pct
        };
        if sentiment.is_adverse() && velocity < 0.0 {
            threshold =
                (threshold - self.config.stress_relax_pct).max(self.config.min_threshold_pct);
        }
        threshold
    }

    // ── Candidate pipeline ──────────────────────────────────────

    /// Walk a candidate through every gate and commit the fill. Each
    /// rejection short-circuits with a structured reason; nothing
    /// partial is ever left behind.
    async fn try_open(&self, impulse: Impulse) {
        let instrument = impulse.instrument;

        let side = match self.decide_side(&impulse).await {
            Some(s) => s,
            None => return,
        };

        if side == Side::Long {
            let verdict = self.trend.check_long(instrument, impulse.price).await;
            if !verdict.allowed {
                tracing::info!(
                    instrument = %instrument,
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "Long entry blocked by trend filter"
                );
                return;
            }
        }

        let trades = self.ledger.trade_history();
        let decision =
            self.gate
                .can_open_position(instrument, self.ledger.open_count(), &trades, now_ms());
        if !decision.allowed {
            tracing::info!(
                instrument = %instrument,
                reason = decision.reason.as_deref().unwrap_or(""),
                "Entry blocked by risk gate"
            );
            return;
        }

        let atr_value = match self.fetch_atr(instrument).await {
            Some(v) => v,
            None => return,
        };

        let account = match self.account.snapshot(instrument).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(instrument = %instrument, error = %e, "Account state unavailable, skipping entry");
                return;
            }
        };
        // Simulated fills settle against the ledger's own balance.
        let balance = match self.mode {
            ExecutionMode::Simulated => self.ledger.balance(),
            ExecutionMode::Live => account.balance,
        };

        let sized = match self.sizer.size(SizeRequest {
            side,
            price: impulse.price,
            atr: atr_value,
            balance,
            leverage: account.max_leverage,
        }) {
            Ok(s) => s,
            Err(rejection) => {
                tracing::info!(instrument = %instrument, reason = %rejection, "Entry rejected by sizer");
                return;
            }
        };

        let order = OrderRequest {
            instrument,
            side,
            contracts: sized.contracts,
            price: impulse.price,
            stop_price: sized.stop_price,
            target_price: sized.target_price,
        };
        let fill = match self.execution.submit(&order).await {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(instrument = %instrument, error = %e, "Order submission failed");
                return;
            }
        };

        // The awaits above can race the sweep; re-check admission before
        // committing the fill to the ledger.
        let trades = self.ledger.trade_history();
        let recheck =
            self.gate
                .can_open_position(instrument, self.ledger.open_count(), &trades, now_ms());
        if !recheck.allowed {
            tracing::warn!(
                instrument = %instrument,
                reason = recheck.reason.as_deref().unwrap_or(""),
                "Fill arrived but admission no longer holds, discarding"
            );
            return;
        }

        let position = Position {
            id: fill.order_id,
            instrument,
            side,
            entry_price: fill.filled_price,
            contracts: sized.contracts,
            stop_price: sized.stop_price,
            target_price: sized.target_price,
            margin: sized.margin_required,
            opened_at: now_ms(),
            mode: self.mode,
            unrealized_pnl: 0.0,
        };
        let report = Self::open_report(&position);

        if let Err(e) = self.ledger.open(position) {
            tracing::warn!(instrument = %instrument, error = %e, "Ledger refused the position");
            return;
        }

        self.dispatch_report(instrument, report);
    }

    /// Side selection: the advisor owns the decision when configured,
    /// otherwise the velocity direction does. Advisor failures mean no
    /// signal, never a crash.
    async fn decide_side(&self, impulse: &Impulse) -> Option<Side> {
        let advisor = match &self.advisor {
            Some(a) => a,
            None => return Some(impulse.side),
        };

        let snapshot = MarketSnapshot::new(
            impulse.instrument,
            impulse.price,
            impulse.velocity,
            impulse.sentiment,
        );
        let verdict = match advisor.analyze(&snapshot).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(instrument = %impulse.instrument, error = %e, "Advisor unavailable, no signal");
                return None;
            }
        };

        if verdict.confidence < self.config.advisor_min_confidence {
            tracing::info!(
                instrument = %impulse.instrument,
                confidence = verdict.confidence,
                minimum = self.config.advisor_min_confidence,
                "Advisor confidence below minimum, skipping"
            );
            return None;
        }

        match verdict.signal {
            AdvisorSignal::Buy => Some(Side::Long),
            AdvisorSignal::Sell => Some(Side::Short),
            AdvisorSignal::Hold => {
                tracing::info!(instrument = %impulse.instrument, "Advisor says hold, skipping");
                None
            }
        }
    }

    async fn fetch_atr(&self, instrument: Instrument) -> Option<f64> {
        let candles = match self
            .atr_candles
            .fetch_candles(
                instrument,
                self.config.atr_granularity_secs,
                self.config.atr_period + 1,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(instrument = %instrument, error = %e, "Candle fetch failed, skipping entry");
                return None;
            }
        };

        match atr(&candles, self.config.atr_period) {
            Some(v) if v > 0.0 => Some(v),
            _ => {
                tracing::warn!(
                    instrument = %instrument,
                    candles = candles.len(),
                    "Insufficient volatility data, skipping entry"
                );
                None
            }
        }
    }

    // ── Sweep ───────────────────────────────────────────────────

    /// Resolve open positions against the latest prices. One
    /// instrument's problems never touch the others.
    pub async fn evaluate_sweep(&self) {
        let now = now_ms();
        for &instrument in &self.instruments {
            let price = {
                let feed = self.feed.read().unwrap();
                feed.latest(instrument)
            };
            let price = match price {
                Some(p) => p,
                // No price yet: skip this cycle, never a close trigger.
                None => continue,
            };

            for closed in self.ledger.evaluate(instrument, price, now) {
                self.finish_close(instrument, closed);
            }
        }
    }

    /// Manual close path with the same side effects as the sweep.
    pub fn close_manual(&self, instrument: Instrument, order_id: &str, hit_stop: bool) -> bool {
        let price = {
            let feed = self.feed.read().unwrap();
            feed.latest(instrument)
        };
        let price = match price {
            Some(p) => p,
            None => {
                tracing::warn!(instrument = %instrument, "No price available for manual close");
                return false;
            }
        };

        match self.ledger.close(order_id, price, hit_stop, now_ms()) {
            crate::ledger::CloseOutcome::Closed(closed) => {
                self.finish_close(instrument, *closed);
                true
            }
            crate::ledger::CloseOutcome::NotFound => {
                tracing::info!(order_id, "Close requested for unknown order id, nothing to do");
                false
            }
        }
    }

    fn finish_close(&self, instrument: Instrument, closed: ClosedPosition) {
        if closed.hit_stop {
            self.gate.note_stop_loss(instrument, closed.closed_at);
        }

        if let Some(log) = &self.trade_log {
            if let Err(e) = log.append(&closed) {
                tracing::warn!(error = %e, "Failed to persist trade row");
            }
        }

        self.dispatch_report(instrument, Self::close_report(&closed));
    }

    // ── Reports ─────────────────────────────────────────────────

    fn open_report(position: &Position) -> SignalReport {
        SignalReport {
            instrument: position.instrument.to_string(),
            side: position.side,
            event: ReportEvent::Open,
            entry_price: position.entry_price,
            exit_price: None,
            stop_price: position.stop_price,
            target_price: position.target_price,
            contracts: position.contracts,
            pnl: None,
            result: None,
            timestamp: position.opened_at,
        }
    }

    fn close_report(closed: &ClosedPosition) -> SignalReport {
        SignalReport {
            instrument: closed.position.instrument.to_string(),
            side: closed.position.side,
            event: ReportEvent::Close,
            entry_price: closed.position.entry_price,
            exit_price: Some(closed.exit_price),
            stop_price: closed.position.stop_price,
            target_price: closed.position.target_price,
            contracts: closed.position.contracts,
            pnl: Some(closed.pnl),
            result: Some(closed.result),
            timestamp: closed.closed_at,
        }
    }

    /// Fire-and-forget delivery; the engine never waits on a webhook.
    fn dispatch_report(&self, instrument: Instrument, report: SignalReport) {
        if let Some(notifier) = self.notifier.clone() {
            tokio::spawn(async move {
                notifier.send_report(instrument, &report).await;
            });
        }
    }
}
