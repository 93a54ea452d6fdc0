//! Account state - balance and leverage, cached on a TTL
//!
//! Live mode reads from the broker account endpoint; simulated mode
//! synthesizes fixed virtual values. Either way the monitor sees the
//! same snapshot shape.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{now_ms, Instrument};

#[cfg(test)]
use mockall::automock;

/// Balance and per-instrument leverage snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountSnapshot {
    /// Available balance in USD
    pub balance: f64,
    /// Maximum leverage for the instrument
    pub max_leverage: f64,
}

/// External account/leverage source
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn fetch_balance(&self) -> Result<f64>;
    async fn fetch_max_leverage(&self, instrument: Instrument) -> Result<f64>;
}

/// Fixed virtual account used in simulated mode
#[derive(Debug, Clone, Copy)]
pub struct VirtualAccount {
    pub balance: f64,
    pub max_leverage: f64,
}

#[async_trait]
impl AccountSource for VirtualAccount {
    async fn fetch_balance(&self) -> Result<f64> {
        Ok(self.balance)
    }

    async fn fetch_max_leverage(&self, _instrument: Instrument) -> Result<f64> {
        Ok(self.max_leverage)
    }
}

/// Authenticated REST client for the broker account endpoints
pub struct BrokerAccount {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, serde::Deserialize)]
struct BalanceResponse {
    available_balance: f64,
}

#[derive(Debug, serde::Deserialize)]
struct LeverageResponse {
    max_leverage: f64,
}

impl BrokerAccount {
    pub fn new(
        base_url: impl Into<String>,
        api_key: String,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build account HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl AccountSource for BrokerAccount {
    async fn fetch_balance(&self) -> Result<f64> {
        let response: BalanceResponse = self
            .client
            .get(format!("{}/account/balance", self.base_url))
            .header("VB-ACCESS-KEY", &self.api_key)
            .send()
            .await
            .context("Balance request failed")?
            .error_for_status()
            .context("Balance endpoint returned an error status")?
            .json()
            .await
            .context("Malformed balance payload")?;
        Ok(response.available_balance)
    }

    async fn fetch_max_leverage(&self, instrument: Instrument) -> Result<f64> {
        let response: LeverageResponse = self
            .client
            .get(format!(
                "{}/instruments/{}/leverage",
                self.base_url,
                instrument.perp_pair()
            ))
            .header("VB-ACCESS-KEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Leverage request failed for {}", instrument))?
            .error_for_status()
            .context("Leverage endpoint returned an error status")?
            .json()
            .await
            .context("Malformed leverage payload")?;
        Ok(response.max_leverage)
    }
}

/// TTL cache in front of any account source (30 s default)
pub struct CachedAccount {
    source: Arc<dyn AccountSource>,
    ttl_ms: i64,
    entries: RwLock<HashMap<Instrument, (AccountSnapshot, i64)>>,
}

impl CachedAccount {
    pub fn new(source: Arc<dyn AccountSource>, ttl_ms: i64) -> Self {
        Self {
            source,
            ttl_ms,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot for an instrument, refreshed once the cached entry ages
    /// past the TTL.
    pub async fn snapshot(&self, instrument: Instrument) -> Result<AccountSnapshot> {
        let now = now_ms();
        {
            let entries = self.entries.read().await;
            if let Some((snapshot, fetched_at)) = entries.get(&instrument) {
                if now - fetched_at < self.ttl_ms {
                    return Ok(*snapshot);
                }
            }
        }

        let balance = self.source.fetch_balance().await?;
        let max_leverage = self.source.fetch_max_leverage(instrument).await?;
        let snapshot = AccountSnapshot {
            balance,
            max_leverage,
        };

        self.entries
            .write()
            .await
            .insert(instrument, (snapshot, now));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccountSource for CountingSource {
        async fn fetch_balance(&self) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(500.0)
        }

        async fn fetch_max_leverage(&self, _instrument: Instrument) -> Result<f64> {
            Ok(20.0)
        }
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = CachedAccount::new(source.clone(), 30_000);

        let first = cache.snapshot(Instrument::ETH).await.unwrap();
        let second = cache.snapshot(Instrument::ETH).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_is_per_instrument() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = CachedAccount::new(source.clone(), 30_000);

        cache.snapshot(Instrument::ETH).await.unwrap();
        cache.snapshot(Instrument::SOL).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_virtual_account_fixed_values() {
        let account = VirtualAccount {
            balance: 500.0,
            max_leverage: 20.0,
        };
        assert_eq!(tokio_test::block_on(account.fetch_balance()).unwrap(), 500.0);
        assert_eq!(
            tokio_test::block_on(account.fetch_max_leverage(Instrument::DOGE)).unwrap(),
            20.0
        );
    }
}
