//! Historical candle source (Coinbase Exchange REST)
//!
//! Candles are fetched on demand and never persisted beyond the
//! computation that needed them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::types::{Candle, Instrument};

#[cfg(test)]
use mockall::automock;

/// On-demand OHLCV provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch up to `count` candles at `granularity_secs`, oldest first.
    async fn fetch_candles(
        &self,
        instrument: Instrument,
        granularity_secs: u64,
        count: usize,
    ) -> Result<Vec<Candle>>;
}

/// REST client for the Coinbase Exchange candles endpoint
pub struct CoinbaseCandles {
    client: Client,
    base_url: String,
}

impl CoinbaseCandles {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build candle HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The endpoint returns rows of [time_secs, low, high, open, close, volume],
    /// newest first.
    fn parse_rows(rows: Vec<[f64; 6]>, count: usize) -> Vec<Candle> {
        let mut candles: Vec<Candle> = rows
            .into_iter()
            .map(|[time, low, high, open, close, volume]| Candle {
                open_time: (time as i64) * 1000,
                open,
                high,
                low,
                close,
                volume,
            })
            .collect();
        candles.sort_by_key(|c| c.open_time);
        if candles.len() > count {
            candles.drain(..candles.len() - count);
        }
        candles
    }
}

#[async_trait]
impl CandleSource for CoinbaseCandles {
    async fn fetch_candles(
        &self,
        instrument: Instrument,
        granularity_secs: u64,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/products/{}/candles",
            self.base_url,
            instrument.spot_pair()
        );

        let response = self
            .client
            .get(&url)
            .query(&[("granularity", granularity_secs.to_string())])
            .header("User-Agent", "velobot")
            .send()
            .await
            .with_context(|| format!("Candle request failed for {}", instrument))?
            .error_for_status()
            .with_context(|| format!("Candle endpoint rejected {}", instrument))?;

        let rows: Vec<[f64; 6]> = response
            .json()
            .await
            .with_context(|| format!("Malformed candle payload for {}", instrument))?;

        Ok(Self::parse_rows(rows, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows_sorts_oldest_first_and_truncates() {
        let rows = vec![
            [300.0, 98.0, 102.0, 100.0, 101.0, 5.0],
            [100.0, 90.0, 95.0, 92.0, 94.0, 3.0],
            [200.0, 94.0, 99.0, 94.0, 98.0, 4.0],
        ];
        let candles = CoinbaseCandles::parse_rows(rows, 2);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 200_000);
        assert_eq!(candles[1].open_time, 300_000);
        assert_eq!(candles[1].close, 101.0);
        assert_eq!(candles[1].low, 98.0);
        assert_eq!(candles[1].high, 102.0);
    }

    #[test]
    fn test_parse_rows_empty() {
        assert!(CoinbaseCandles::parse_rows(vec![], 10).is_empty());
    }
}
