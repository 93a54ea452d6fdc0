//! Advisory oracle client - opaque signal/confidence source
//!
//! Sends a market snapshot to the external analysis endpoint and reads
//! back a signal with a confidence score. The oracle is a black box:
//! any malformed, out-of-range, or failed response degrades to a
//! no-signal outcome and the engine moves on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{Instrument, MarketSentiment};

#[cfg(test)]
use mockall::automock;

/// Signal direction from the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdvisorSignal {
    Buy,
    Sell,
    Hold,
}

/// Parsed oracle verdict; confidence is clamped to 0-100
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorVerdict {
    pub signal: AdvisorSignal,
    pub confidence: u8,
    pub reasoning: String,
}

/// Snapshot handed to the oracle with each consultation
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub pair: String,
    pub price: f64,
    pub velocity_pct: f64,
    pub sentiment: String,
}

impl MarketSnapshot {
    pub fn new(
        instrument: Instrument,
        price: f64,
        velocity_pct: f64,
        sentiment: MarketSentiment,
    ) -> Self {
        Self {
            pair: instrument.perp_pair().to_string(),
            price,
            velocity_pct,
            sentiment: sentiment.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    signal: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Advisory oracle boundary
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Advisor: Send + Sync {
    /// A returned error means "no signal"; callers skip the trade.
    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AdvisorVerdict>;
}

/// HTTP client for the analysis endpoint
pub struct AdvisorClient {
    client: Client,
    endpoint: String,
}

impl AdvisorClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build advisor HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn parse_verdict(raw: RawVerdict) -> Result<AdvisorVerdict> {
        let signal = match raw.signal.to_uppercase().as_str() {
            "BUY" => AdvisorSignal::Buy,
            "SELL" => AdvisorSignal::Sell,
            "HOLD" => AdvisorSignal::Hold,
            other => anyhow::bail!("Unrecognized advisor signal: {}", other),
        };
        if !raw.confidence.is_finite() {
            anyhow::bail!("Non-finite advisor confidence");
        }
        Ok(AdvisorVerdict {
            signal,
            confidence: raw.confidence.clamp(0.0, 100.0) as u8,
            reasoning: raw.reasoning,
        })
    }
}

#[async_trait]
impl Advisor for AdvisorClient {
    async fn analyze(&self, snapshot: &MarketSnapshot) -> Result<AdvisorVerdict> {
        let raw: RawVerdict = self
            .client
            .post(&self.endpoint)
            .json(snapshot)
            .send()
            .await
            .context("Advisor request failed")?
            .error_for_status()
            .context("Advisor endpoint returned an error status")?
            .json()
            .await
            .context("Malformed advisor response")?;

        Self::parse_verdict(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_signals() {
        let verdict = AdvisorClient::parse_verdict(RawVerdict {
            signal: "buy".to_string(),
            confidence: 82.0,
            reasoning: "momentum".to_string(),
        })
        .unwrap();
        assert_eq!(verdict.signal, AdvisorSignal::Buy);
        assert_eq!(verdict.confidence, 82);
    }

    #[test]
    fn test_confidence_clamped_to_range() {
        let verdict = AdvisorClient::parse_verdict(RawVerdict {
            signal: "SELL".to_string(),
            confidence: 250.0,
            reasoning: String::new(),
        })
        .unwrap();
        assert_eq!(verdict.confidence, 100);

        let verdict = AdvisorClient::parse_verdict(RawVerdict {
            signal: "HOLD".to_string(),
            confidence: -5.0,
            reasoning: String::new(),
        })
        .unwrap();
        assert_eq!(verdict.confidence, 0);
    }

    #[test]
    fn test_garbage_signal_is_no_signal() {
        let result = AdvisorClient::parse_verdict(RawVerdict {
            signal: "MOON".to_string(),
            confidence: 99.0,
            reasoning: String::new(),
        });
        assert!(result.is_err());

        let result = AdvisorClient::parse_verdict(RawVerdict {
            signal: "BUY".to_string(),
            confidence: f64::NAN,
            reasoning: String::new(),
        });
        assert!(result.is_err());
    }
}
