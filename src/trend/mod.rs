//! Trend filter - blocks long entries into a confirmed downtrend
//!
//! Compares the current price against SMA(200) on two long granularities
//! (1 h and 4 h by default). A long is blocked when the price sits below
//! both averages. Any data failure blocks: an unverified long is never
//! allowed. Shorts are never filtered here.

use std::sync::Arc;

use crate::indicators::sma;
use crate::market::CandleSource;
use crate::types::{GateDecision, Instrument};

#[derive(Debug, Clone)]
pub struct TrendConfig {
    /// SMA period applied at every granularity
    pub sma_period: usize,
    /// Granularities checked, in seconds (1 h and 4 h)
    pub granularities_secs: Vec<u64>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            sma_period: 200,
            granularities_secs: vec![3_600, 14_400],
        }
    }
}

/// Long-entry admission check against long-horizon moving averages
pub struct TrendFilter {
    config: TrendConfig,
    candles: Arc<dyn CandleSource>,
}

impl TrendFilter {
    pub fn new(config: TrendConfig, candles: Arc<dyn CandleSource>) -> Self {
        Self { config, candles }
    }

    /// Allow a long unless the price is below the SMA at every checked
    /// granularity. A failed fetch counts as "below": fail closed.
    pub async fn check_long(&self, instrument: Instrument, current_price: f64) -> GateDecision {
        let mut below_all = true;

        for &granularity in &self.config.granularities_secs {
            let candles = match self
                .candles
                .fetch_candles(instrument, granularity, self.config.sma_period)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        instrument = %instrument,
                        granularity_secs = granularity,
                        error = %e,
                        "Trend data unavailable, blocking long entry"
                    );
                    return GateDecision::block(format!(
                        "Trend data unavailable at {}s granularity",
                        granularity
                    ));
                }
            };

            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            let average = match sma(&closes, self.config.sma_period) {
                Some(v) => v,
                None => {
                    return GateDecision::block(format!(
                        "No closes available at {}s granularity",
                        granularity
                    ));
                }
            };

            if current_price >= average {
                below_all = false;
            }
        }

        if below_all {
            GateDecision::block(format!(
                "Downtrend: price below SMA({}) on all checked granularities",
                self.config.sma_period
            ))
        } else {
            GateDecision::allow()
        }
    }
}
