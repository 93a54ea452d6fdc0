//! Position ledger - lifecycle of open positions and their resolution
//!
//! Positions move OPEN -> CLOSED_WIN | CLOSED_LOSS and nothing else.
//! The ledger is a pure state machine: it owns the active set, the
//! 24-hour trade history, and the virtual balance in simulated mode.
//! Reporting and cooldown side effects belong to the orchestrator.

use std::sync::RwLock;
use thiserror::Error;

use crate::risk::TRADE_WINDOW_MS;
use crate::types::{
    ExecutionMode, Instrument, Position, Side, TradeRecord, TradeResult,
};

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Open position already exists for {0}")]
    DuplicatePosition(Instrument),

    #[error("Contract count must be at least 1")]
    InvalidQuantity,

    #[error("Bracket prices inconsistent with side")]
    InvalidBracket,
}

/// Resolution of one closed position
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    /// Realized PnL after the optional fee estimate
    pub pnl: f64,
    pub fee: f64,
    pub result: TradeResult,
    /// True when the stop side of the bracket triggered the close
    pub hit_stop: bool,
    pub closed_at: i64,
}

/// Manual-close outcome; an unknown id is a reported no-op, never a fault
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(Box<ClosedPosition>),
    NotFound,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Starting virtual balance for simulated mode (USD)
    pub initial_balance: f64,
    /// Subtract a taker-fee estimate from realized PnL
    pub model_taker_fees: bool,
    /// Per-side taker fee rate (0.0006 = 0.06 %)
    pub taker_fee_rate: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 500.0,
            model_taker_fees: false,
            taker_fee_rate: 0.0006,
        }
    }
}

pub struct PositionLedger {
    config: LedgerConfig,
    positions: RwLock<Vec<Position>>,
    history: RwLock<Vec<TradeRecord>>,
    /// Virtual balance; only mutated for simulated positions
    balance: RwLock<f64>,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        let initial_balance = config.initial_balance;
        Self {
            config,
            positions: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            balance: RwLock::new(initial_balance),
        }
    }

    // ── Open ────────────────────────────────────────────────────

    /// Add a position to the active set. One open position per
    /// instrument; margin leaves the virtual balance in simulated mode;
    /// a Pending trade record is always written.
    pub fn open(&self, position: Position) -> Result<(), LedgerError> {
        if position.contracts < 1 {
            return Err(LedgerError::InvalidQuantity);
        }
        let bracket_ok = match position.side {
            Side::Long => {
                position.stop_price < position.entry_price
                    && position.target_price > position.entry_price
            }
            Side::Short => {
                position.stop_price > position.entry_price
                    && position.target_price < position.entry_price
            }
        };
        if !bracket_ok {
            return Err(LedgerError::InvalidBracket);
        }

        {
            let mut positions = self.positions.write().unwrap();
            if positions.iter().any(|p| p.instrument == position.instrument) {
                return Err(LedgerError::DuplicatePosition(position.instrument));
            }
            if position.mode == ExecutionMode::Simulated {
                *self.balance.write().unwrap() -= position.margin;
            }
            positions.push(position.clone());
        }

        self.history.write().unwrap().push(TradeRecord {
            order_id: position.id.clone(),
            instrument: position.instrument,
            side: position.side,
            opened_at: position.opened_at,
            closed_at: 0,
            result: TradeResult::Pending,
            pnl: 0.0,
        });

        tracing::info!(
            instrument = %position.instrument,
            side = %position.side,
            contracts = position.contracts,
            entry = position.entry_price,
            stop = position.stop_price,
            target = position.target_price,
            mode = %position.mode,
            "📈 Position opened"
        );
        Ok(())
    }

    // ── Evaluate ────────────────────────────────────────────────

    /// Check every open position on `instrument` against its bracket at
    /// the current price, closing the ones that resolved. Unresolved
    /// positions get their unrealized PnL refreshed.
    pub fn evaluate(&self, instrument: Instrument, price: f64, now: i64) -> Vec<ClosedPosition> {
        let mut resolved = Vec::new();

        let mut positions = self.positions.write().unwrap();
        let mut index = 0;
        while index < positions.len() {
            if positions[index].instrument != instrument {
                index += 1;
                continue;
            }

            let trigger = match positions[index].side {
                Side::Long => {
                    if price >= positions[index].target_price {
                        Some((TradeResult::Win, false))
                    } else if price <= positions[index].stop_price {
                        Some((TradeResult::Loss, true))
                    } else {
                        None
                    }
                }
                Side::Short => {
                    if price <= positions[index].target_price {
                        Some((TradeResult::Win, false))
                    } else if price >= positions[index].stop_price {
                        Some((TradeResult::Loss, true))
                    } else {
                        None
                    }
                }
            };

            match trigger {
                Some((result, hit_stop)) => {
                    let position = positions.remove(index);
                    resolved.push(self.settle(position, price, result, hit_stop, now));
                }
                None => {
                    let p = &mut positions[index];
                    p.unrealized_pnl =
                        (price - p.entry_price) * p.contracts as f64 * p.side.sign();
                    index += 1;
                }
            }
        }

        resolved
    }

    // ── Close ───────────────────────────────────────────────────

    /// Manual close at `exit_price`. Idempotent: closing an id that is
    /// no longer active reports NotFound and changes nothing.
    pub fn close(
        &self,
        order_id: &str,
        exit_price: f64,
        hit_stop: bool,
        now: i64,
    ) -> CloseOutcome {
        let position = {
            let mut positions = self.positions.write().unwrap();
            match positions.iter().position(|p| p.id == order_id) {
                Some(index) => positions.remove(index),
                None => return CloseOutcome::NotFound,
            }
        };

        let gross = (exit_price - position.entry_price)
            * position.contracts as f64
            * position.side.sign();
        let result = if hit_stop || gross < 0.0 {
            TradeResult::Loss
        } else {
            TradeResult::Win
        };
        CloseOutcome::Closed(Box::new(self.settle(
            position, exit_price, result, hit_stop, now,
        )))
    }

    fn settle(
        &self,
        position: Position,
        exit_price: f64,
        result: TradeResult,
        hit_stop: bool,
        now: i64,
    ) -> ClosedPosition {
        let gross = (exit_price - position.entry_price)
            * position.contracts as f64
            * position.side.sign();
        let fee = if self.config.model_taker_fees {
            self.config.taker_fee_rate
                * (position.entry_price + exit_price)
                * position.contracts as f64
        } else {
            0.0
        };
        let pnl = gross - fee;

        if position.mode == ExecutionMode::Simulated {
            *self.balance.write().unwrap() += position.margin + pnl;
        }

        {
            let mut history = self.history.write().unwrap();
            if let Some(record) = history.iter_mut().find(|r| r.order_id == position.id) {
                record.closed_at = now;
                record.result = result;
                record.pnl = pnl;
            }
        }

        tracing::info!(
            instrument = %position.instrument,
            side = %position.side,
            entry = position.entry_price,
            exit = exit_price,
            pnl = %format!("{:.2}", pnl),
            result = %result,
            "🏁 Position closed"
        );

        ClosedPosition {
            position,
            exit_price,
            pnl,
            fee,
            result,
            hit_stop,
            closed_at: now,
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn open_count(&self) -> usize {
        self.positions.read().unwrap().len()
    }

    pub fn has_open(&self, instrument: Instrument) -> bool {
        self.positions
            .read()
            .unwrap()
            .iter()
            .any(|p| p.instrument == instrument)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.read().unwrap().clone()
    }

    /// Trade history snapshot for the risk gate
    pub fn trade_history(&self) -> Vec<TradeRecord> {
        self.history.read().unwrap().clone()
    }

    /// Virtual balance (meaningful in simulated mode)
    pub fn balance(&self) -> f64 {
        *self.balance.read().unwrap()
    }

    /// Drop closed records older than the rolling 24-hour window.
    /// Pending records always survive.
    pub fn prune_history(&self, now: i64) {
        let cutoff = now - TRADE_WINDOW_MS;
        self.history
            .write()
            .unwrap()
            .retain(|r| r.result == TradeResult::Pending || r.opened_at >= cutoff);
    }
}

impl Default for PositionLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(instrument: Instrument, side: Side, entry: f64, stop: f64, target: f64) -> Position {
        Position {
            id: format!("{}-{}", instrument, entry),
            instrument,
            side,
            entry_price: entry,
            contracts: 2,
            stop_price: stop,
            target_price: target,
            margin: 50.0,
            opened_at: 1_000,
            mode: ExecutionMode::Simulated,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn test_open_deducts_margin_and_records_pending() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();

        assert_eq!(ledger.balance(), 450.0);
        assert_eq!(ledger.open_count(), 1);
        let history = ledger.trade_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].result, TradeResult::Pending);
    }

    #[test]
    fn test_duplicate_open_rejected() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();
        let err = ledger
            .open(position(Instrument::ETH, Side::Short, 2501.0, 2530.0, 2440.0))
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicatePosition(Instrument::ETH));
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_invalid_bracket_rejected() {
        let ledger = PositionLedger::default();
        // Long with the stop above entry is inconsistent.
        let err = ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2530.0, 2560.0))
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidBracket);
    }

    #[test]
    fn test_long_target_win() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();

        assert!(ledger.evaluate(Instrument::ETH, 2555.0, 2_000).is_empty());

        let closed = ledger.evaluate(Instrument::ETH, 2560.0, 3_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].result, TradeResult::Win);
        assert!(!closed[0].hit_stop);
        // (2560 - 2500) * 2 contracts
        assert_eq!(closed[0].pnl, 120.0);
        assert_eq!(ledger.open_count(), 0);
        // 500 - 50 margin + (50 margin + 120 pnl)
        assert_eq!(ledger.balance(), 620.0);
    }

    #[test]
    fn test_long_stop_loss() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();

        let closed = ledger.evaluate(Instrument::ETH, 2468.0, 3_000);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].result, TradeResult::Loss);
        assert!(closed[0].hit_stop);
        assert_eq!(closed[0].pnl, -64.0);

        let history = ledger.trade_history();
        assert_eq!(history[0].result, TradeResult::Loss);
        assert_eq!(history[0].closed_at, 3_000);
    }

    #[test]
    fn test_short_bracket_mirrored() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::SOL, Side::Short, 150.0, 153.0, 144.0))
            .unwrap();

        // Price falling to the target wins a short.
        let closed = ledger.evaluate(Instrument::SOL, 144.0, 2_000);
        assert_eq!(closed[0].result, TradeResult::Win);
        assert_eq!(closed[0].pnl, 12.0);

        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::SOL, Side::Short, 150.0, 153.0, 144.0))
            .unwrap();
        let closed = ledger.evaluate(Instrument::SOL, 153.5, 2_000);
        assert_eq!(closed[0].result, TradeResult::Loss);
        assert!(closed[0].hit_stop);
    }

    #[test]
    fn test_evaluate_other_instrument_untouched() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();
        assert!(ledger.evaluate(Instrument::SOL, 1.0, 2_000).is_empty());
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_unrealized_pnl_refreshed() {
        let ledger = PositionLedger::default();
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();
        ledger.evaluate(Instrument::ETH, 2510.0, 2_000);
        let open = ledger.open_positions();
        assert_eq!(open[0].unrealized_pnl, 20.0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let ledger = PositionLedger::default();
        let pos = position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0);
        let id = pos.id.clone();
        ledger.open(pos).unwrap();

        let first = ledger.close(&id, 2520.0, false, 2_000);
        assert!(matches!(first, CloseOutcome::Closed(_)));
        assert_eq!(ledger.open_count(), 0);

        let second = ledger.close(&id, 2520.0, false, 2_500);
        assert!(matches!(second, CloseOutcome::NotFound));
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_manual_close_classifies_by_pnl() {
        let ledger = PositionLedger::default();
        let pos = position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0);
        let id = pos.id.clone();
        ledger.open(pos).unwrap();

        match ledger.close(&id, 2490.0, false, 2_000) {
            CloseOutcome::Closed(closed) => {
                assert_eq!(closed.result, TradeResult::Loss);
                assert_eq!(closed.pnl, -20.0);
            }
            CloseOutcome::NotFound => panic!("expected a close"),
        }
    }

    #[test]
    fn test_taker_fee_modeling() {
        let ledger = PositionLedger::new(LedgerConfig {
            model_taker_fees: true,
            ..LedgerConfig::default()
        });
        ledger
            .open(position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0))
            .unwrap();

        let closed = ledger.evaluate(Instrument::ETH, 2560.0, 2_000);
        // fee = 0.0006 * (2500 + 2560) * 2 = 6.072
        assert!((closed[0].fee - 6.072).abs() < 1e-9);
        assert!((closed[0].pnl - (120.0 - 6.072)).abs() < 1e-9);
    }

    #[test]
    fn test_prune_keeps_recent_and_pending() {
        let ledger = PositionLedger::default();
        let old = position(Instrument::ETH, Side::Long, 2500.0, 2470.0, 2560.0);
        let old_id = old.id.clone();
        ledger.open(old).unwrap();
        match ledger.close(&old_id, 2560.0, false, 2_000) {
            CloseOutcome::Closed(_) => {}
            CloseOutcome::NotFound => panic!("expected a close"),
        }

        let mut fresh = position(Instrument::SOL, Side::Long, 150.0, 148.0, 154.0);
        fresh.opened_at = TRADE_WINDOW_MS + 500;
        ledger.open(fresh).unwrap();

        ledger.prune_history(TRADE_WINDOW_MS + 1_500);
        let history = ledger.trade_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].instrument, Instrument::SOL);
    }
}
