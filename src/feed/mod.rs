//! Price feed - latest prices and a bounded rolling window per instrument
//!
//! The cache keeps the most recent price and a trailing 5-minute sample
//! buffer for each instrument, used by the velocity check. Samples are
//! stamped on receipt, so out-of-order upstream delivery cannot corrupt
//! the time ordering of the buffer.

pub mod coinbase;

pub use coinbase::CoinbaseFeed;

use std::collections::{HashMap, VecDeque};

use crate::types::{Instrument, PriceSample};

/// Retention window for velocity samples (5 minutes)
pub const SAMPLE_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Events emitted by a feed client
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// New price for an instrument, stamped on receipt
    Tick {
        instrument: Instrument,
        price: f64,
        ts: i64,
    },
    Connected,
    Disconnected,
    Error(String),
}

/// Latest price plus a trailing 5-minute sample window per instrument.
///
/// Single writer: only the monitor task records ticks.
#[derive(Debug, Default)]
pub struct PriceFeedCache {
    latest: HashMap<Instrument, f64>,
    windows: HashMap<Instrument, VecDeque<PriceSample>>,
}

impl PriceFeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample and evict everything older than the retention
    /// window. Eviction is a prefix trim; the buffer stays time-ordered
    /// because `ts` is a receive timestamp.
    pub fn record_tick(&mut self, instrument: Instrument, price: f64, ts: i64) {
        self.latest.insert(instrument, price);

        let window = self.windows.entry(instrument).or_default();
        window.push_back(PriceSample { ts, price });

        let cutoff = ts - SAMPLE_WINDOW_MS;
        while window.front().map_or(false, |s| s.ts < cutoff) {
            window.pop_front();
        }
    }

    /// Most recent price for an instrument
    pub fn latest(&self, instrument: Instrument) -> Option<f64> {
        self.latest.get(&instrument).copied()
    }

    /// Oldest sample still inside the retention window
    pub fn oldest_in_window(&self, instrument: Instrument) -> Option<PriceSample> {
        self.windows
            .get(&instrument)
            .and_then(|w| w.front())
            .copied()
    }

    /// Number of samples currently buffered for an instrument
    pub fn sample_count(&self, instrument: Instrument) -> usize {
        self.windows.get(&instrument).map_or(0, |w| w.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_tracks_most_recent_tick() {
        let mut cache = PriceFeedCache::new();
        cache.record_tick(Instrument::ETH, 2500.0, 1_000);
        cache.record_tick(Instrument::ETH, 2510.0, 2_000);
        assert_eq!(cache.latest(Instrument::ETH), Some(2510.0));
        assert_eq!(cache.latest(Instrument::SOL), None);
    }

    #[test]
    fn test_window_prunes_stale_prefix() {
        let mut cache = PriceFeedCache::new();
        cache.record_tick(Instrument::ETH, 2500.0, 0);
        cache.record_tick(Instrument::ETH, 2505.0, 60_000);
        cache.record_tick(Instrument::ETH, 2510.0, SAMPLE_WINDOW_MS + 30_000);

        // First sample fell out of the 5-minute window.
        let oldest = cache.oldest_in_window(Instrument::ETH).unwrap();
        assert_eq!(oldest.ts, 60_000);
        assert_eq!(cache.sample_count(Instrument::ETH), 2);
    }

    #[test]
    fn test_sample_exactly_at_cutoff_is_kept() {
        let mut cache = PriceFeedCache::new();
        cache.record_tick(Instrument::ETH, 2500.0, 0);
        cache.record_tick(Instrument::ETH, 2510.0, SAMPLE_WINDOW_MS);
        assert_eq!(cache.sample_count(Instrument::ETH), 2);
        assert_eq!(cache.oldest_in_window(Instrument::ETH).unwrap().ts, 0);
    }

    #[test]
    fn test_instruments_are_isolated() {
        let mut cache = PriceFeedCache::new();
        cache.record_tick(Instrument::ETH, 2500.0, 1_000);
        cache.record_tick(Instrument::DOGE, 0.1, 1_000);
        assert_eq!(cache.sample_count(Instrument::ETH), 1);
        assert_eq!(cache.sample_count(Instrument::DOGE), 1);
        assert_eq!(cache.oldest_in_window(Instrument::SOL), None);
    }
}
