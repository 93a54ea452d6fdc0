//! Risk gate - admission control before opening any position
//!
//! Three layers of protection, all advisory gates returning structured
//! reasons (callers branch, nothing throws):
//! - rolling 24-hour two-trade limit per instrument, with a cooldown
//!   before the second chance after a loss
//! - global open-position cap
//! - per-instrument cooldown after a stop-loss hit, independent of the
//!   trade counter
//! plus the generic last-alert debounce used by the velocity monitor.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{GateDecision, Instrument, TradeRecord, TradeResult};

/// Rolling window for the per-instrument trade count (24 hours)
pub const TRADE_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct RiskGateConfig {
    /// Global cap on concurrently open positions
    pub max_open_positions: usize,
    /// Trades allowed per instrument per rolling 24 h
    pub max_trades_per_day: usize,
    /// Cooldown after a losing trade before the second chance (ms)
    pub loss_cooldown_ms: i64,
    /// Default debounce between velocity alerts per instrument (ms)
    pub debounce_ms: i64,
}

impl Default for RiskGateConfig {
    fn default() -> Self {
        Self {
            max_open_positions: 3,
            max_trades_per_day: 2,
            loss_cooldown_ms: 3 * 60 * 60 * 1000,
            debounce_ms: 3 * 60 * 60 * 1000,
        }
    }
}

/// Per-instrument alert/cooldown timestamps plus the gate rules
pub struct RiskGate {
    config: RiskGateConfig,
    /// Last velocity alert per instrument (debounce)
    last_alert: RwLock<HashMap<Instrument, i64>>,
    /// Last stop-loss hit per instrument (cooldown)
    last_stop_loss: RwLock<HashMap<Instrument, i64>>,
}

impl RiskGate {
    pub fn new(config: RiskGateConfig) -> Self {
        Self {
            config,
            last_alert: RwLock::new(HashMap::new()),
            last_stop_loss: RwLock::new(HashMap::new()),
        }
    }

    /// Two-chances rule: at most `max_trades_per_day` trades per
    /// instrument per rolling 24 h, and after a single losing trade the
    /// second chance waits out the loss cooldown. Re-entry is allowed at
    /// exactly loss + cooldown.
    pub fn can_trade_today(
        &self,
        instrument: Instrument,
        trades: &[TradeRecord],
        now: i64,
    ) -> GateDecision {
        let window_start = now - TRADE_WINDOW_MS;
        let recent: Vec<&TradeRecord> = trades
            .iter()
            .filter(|t| t.instrument == instrument && t.opened_at >= window_start)
            .collect();

        if recent.len() >= self.config.max_trades_per_day {
            return GateDecision::block(format!(
                "Daily trade limit reached ({}/{})",
                recent.len(),
                self.config.max_trades_per_day
            ));
        }

        if recent.len() == 1 {
            let only = recent[0];
            if only.result == TradeResult::Loss {
                let elapsed = now - only.closed_at;
                if elapsed < self.config.loss_cooldown_ms {
                    let remaining_min = (self.config.loss_cooldown_ms - elapsed) / 60_000;
                    return GateDecision::block(format!(
                        "Second chance on cooldown after loss ({} min left)",
                        remaining_min
                    ));
                }
            }
        }

        GateDecision::allow()
    }

    /// Full admission check: portfolio cap, stop-loss cooldown, then the
    /// two-chances rule.
    pub fn can_open_position(
        &self,
        instrument: Instrument,
        open_positions: usize,
        trades: &[TradeRecord],
        now: i64,
    ) -> GateDecision {
        if open_positions >= self.config.max_open_positions {
            return GateDecision::block(format!(
                "Portfolio full ({}/{})",
                open_positions, self.config.max_open_positions
            ));
        }

        if let Some(loss_ts) = self.last_stop_loss_ts(instrument) {
            let elapsed = now - loss_ts;
            if elapsed < self.config.loss_cooldown_ms {
                let remaining_min = (self.config.loss_cooldown_ms - elapsed) / 60_000;
                return GateDecision::block(format!(
                    "Stop-loss cooldown active ({} min left)",
                    remaining_min
                ));
            }
        }

        self.can_trade_today(instrument, trades, now)
    }

    /// Last-alert gate for the velocity monitor. Admitting records the
    /// alert time, so a move fires at most once per debounce window.
    pub fn debounce(&self, instrument: Instrument, now: i64) -> bool {
        let mut alerts = self.last_alert.write().unwrap();
        if let Some(last) = alerts.get(&instrument) {
            if now - last < self.config.debounce_ms {
                return false;
            }
        }
        alerts.insert(instrument, now);
        true
    }

    /// Arm the per-instrument cooldown after a stop-loss hit
    pub fn note_stop_loss(&self, instrument: Instrument, ts: i64) {
        self.last_stop_loss.write().unwrap().insert(instrument, ts);
    }

    fn last_stop_loss_ts(&self, instrument: Instrument) -> Option<i64> {
        self.last_stop_loss
            .read()
            .unwrap()
            .get(&instrument)
            .copied()
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new(RiskGateConfig::default())
    }
}
