//! Equity-market context - aggregate sentiment for the velocity monitor
//!
//! Derives a coarse sentiment from a small equity watchlist: a sharp
//! Nasdaq-proxy or MSTR drop flags broad-market stress, which makes the
//! monitor more sensitive to downside crypto moves. Any failure here
//! degrades to Neutral; sentiment is an input, not a gate.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::types::{now_ms, MarketSentiment};

/// External market-context source
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn market_sentiment(&self) -> Result<MarketSentiment>;
}

/// Quote response shape from the quotes endpoint
#[derive(Debug, Clone, Deserialize)]
struct Quote {
    /// Current price
    #[serde(rename = "c")]
    current: f64,
    /// Percent change on the day
    #[serde(rename = "dp")]
    change_pct: Option<f64>,
}

/// Sentiment derived from index-proxy and crypto-correlated equities
pub struct EquityContextFeed {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EquityContextFeed {
    /// Watched symbols: the Nasdaq proxy decides the bull/bear lean,
    /// MSTR is the crypto-correlated crash canary.
    const INDEX_PROXY: &'static str = "QQQ";
    const CRYPTO_PROXY: &'static str = "MSTR";

    pub fn new(base_url: impl Into<String>, api_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build market-context HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn fetch_change_pct(&self, symbol: &str) -> Result<Option<f64>> {
        let url = format!("{}/quote", self.base_url);
        let quote: Quote = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", self.api_key.as_str())])
            .send()
            .await
            .with_context(|| format!("Quote request failed for {}", symbol))?
            .error_for_status()
            .with_context(|| format!("Quote endpoint rejected {}", symbol))?
            .json()
            .await
            .with_context(|| format!("Malformed quote payload for {}", symbol))?;

        if quote.current == 0.0 {
            return Ok(None);
        }
        Ok(quote.change_pct)
    }

    fn classify(index_change: Option<f64>, crypto_change: Option<f64>) -> MarketSentiment {
        let index_drop = index_change.map_or(false, |c| c < -2.0);
        let crypto_drop = crypto_change.map_or(false, |c| c < -2.0);
        if index_drop || crypto_drop {
            return MarketSentiment::CrashWarning;
        }
        match index_change {
            Some(c) if c < -1.0 => MarketSentiment::Bearish,
            Some(c) if c > 1.0 => MarketSentiment::Bullish,
            _ => MarketSentiment::Neutral,
        }
    }
}

#[async_trait]
impl SentimentSource for EquityContextFeed {
    async fn market_sentiment(&self) -> Result<MarketSentiment> {
        let index_change = self.fetch_change_pct(Self::INDEX_PROXY).await?;
        let crypto_change = self.fetch_change_pct(Self::CRYPTO_PROXY).await?;
        Ok(Self::classify(index_change, crypto_change))
    }
}

/// TTL cache in front of a sentiment source (60 s default).
/// Failures return the last known value, or Neutral if none.
pub struct CachedSentiment {
    source: Arc<dyn SentimentSource>,
    ttl_ms: i64,
    state: RwLock<(MarketSentiment, i64)>,
}

impl CachedSentiment {
    pub fn new(source: Arc<dyn SentimentSource>, ttl_ms: i64) -> Self {
        Self {
            source,
            ttl_ms,
            state: RwLock::new((MarketSentiment::Neutral, 0)),
        }
    }

    pub async fn current(&self) -> MarketSentiment {
        let now = now_ms();
        {
            let state = self.state.read().await;
            if state.1 > 0 && now - state.1 < self.ttl_ms {
                return state.0;
            }
        }

        match self.source.market_sentiment().await {
            Ok(sentiment) => {
                *self.state.write().await = (sentiment, now);
                sentiment
            }
            Err(e) => {
                tracing::warn!(error = %e, "Market context unavailable, keeping last sentiment");
                // Stamp the failure too, so a dead endpoint is not hammered
                // on every tick.
                let mut state = self.state.write().await;
                state.1 = now;
                state.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_classify_crash_on_index_or_crypto_drop() {
        assert_eq!(
            EquityContextFeed::classify(Some(-2.5), Some(0.0)),
            MarketSentiment::CrashWarning
        );
        assert_eq!(
            EquityContextFeed::classify(Some(0.0), Some(-3.0)),
            MarketSentiment::CrashWarning
        );
    }

    #[test]
    fn test_classify_bearish_bullish_neutral() {
        assert_eq!(
            EquityContextFeed::classify(Some(-1.5), None),
            MarketSentiment::Bearish
        );
        assert_eq!(
            EquityContextFeed::classify(Some(1.5), Some(0.5)),
            MarketSentiment::Bullish
        );
        assert_eq!(
            EquityContextFeed::classify(Some(0.2), Some(0.1)),
            MarketSentiment::Neutral
        );
        assert_eq!(
            EquityContextFeed::classify(None, None),
            MarketSentiment::Neutral
        );
    }

    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SentimentSource for FlakySource {
        async fn market_sentiment(&self) -> Result<MarketSentiment> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(MarketSentiment::Bearish)
            } else {
                anyhow::bail!("endpoint down")
            }
        }
    }

    #[tokio::test]
    async fn test_cache_keeps_last_value_on_failure() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let cache = CachedSentiment::new(source, 0);

        assert_eq!(cache.current().await, MarketSentiment::Bearish);
        // TTL zero forces a refetch; the failure keeps the last value.
        assert_eq!(cache.current().await, MarketSentiment::Bearish);
    }

    #[tokio::test]
    async fn test_cache_defaults_to_neutral() {
        struct DeadSource;
        #[async_trait]
        impl SentimentSource for DeadSource {
            async fn market_sentiment(&self) -> Result<MarketSentiment> {
                anyhow::bail!("never up")
            }
        }
        let cache = CachedSentiment::new(Arc::new(DeadSource), 60_000);
        assert_eq!(cache.current().await, MarketSentiment::Neutral);
    }
}
