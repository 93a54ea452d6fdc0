//! CSV persistence - append-only trade history
//!
//! One row per closed trade, written as positions resolve. The file is
//! an operator artifact; the engine never reads it back.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::ledger::ClosedPosition;
use crate::types::format_ts;

/// Flattened CSV row for a closed trade
#[derive(Debug, Clone, Serialize)]
pub struct TradeRow {
    pub closed_at: String,
    pub order_id: String,
    pub instrument: String,
    pub side: String,
    pub contracts: u32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub pnl: f64,
    pub fee: f64,
    pub result: String,
    pub hit_stop: bool,
    pub mode: String,
}

impl TradeRow {
    pub fn from_closed(closed: &ClosedPosition) -> Self {
        let p = &closed.position;
        Self {
            closed_at: format_ts(closed.closed_at),
            order_id: p.id.clone(),
            instrument: p.instrument.to_string(),
            side: p.side.to_string(),
            contracts: p.contracts,
            entry_price: p.entry_price,
            exit_price: closed.exit_price,
            stop_price: p.stop_price,
            target_price: p.target_price,
            pnl: closed.pnl,
            fee: closed.fee,
            result: closed.result.to_string(),
            hit_stop: closed.hit_stop,
            mode: p.mode.to_string(),
        }
    }
}

/// Append-only CSV writer for trade history
pub struct CsvTradeLog {
    path: PathBuf,
}

impl CsvTradeLog {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = data_dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        Ok(Self {
            path: dir.join("trades.csv"),
        })
    }

    /// Append one closed trade; writes the header on first use.
    pub fn append(&self, closed: &ClosedPosition) -> Result<()> {
        let write_header = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer
            .serialize(TradeRow::from_closed(closed))
            .context("Failed to serialize trade row")?;
        writer.flush().context("Failed to flush trade row")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
