//! Order execution - simulated fills and the live broker client
//!
//! One interface, two implementations, selected once at startup. The
//! rest of the engine never branches on the mode: a simulated fill and
//! a live fill produce the same `Fill` shape.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{now_ms, Instrument, Side};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Broker API error: {0}")]
    Api(String),

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("Order rejected: {0}")]
    Rejected(String),
}

/// Bracketed order as the engine hands it to the execution layer
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub instrument: Instrument,
    pub side: Side,
    pub contracts: u32,
    /// Reference price at submission time; simulated fills use it
    pub price: f64,
    pub stop_price: f64,
    pub target_price: f64,
}

/// Acknowledged fill
#[derive(Debug, Clone, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub filled_price: f64,
}

/// Order submission boundary
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> Result<Fill, ExecutionError>;
}

// ── Simulated ───────────────────────────────────────────────────

/// Pure local execution: fills at the reference price, no external call
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecution;

#[async_trait]
impl ExecutionEngine for SimulatedExecution {
    async fn submit(&self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        if order.contracts < 1 {
            return Err(ExecutionError::Rejected(
                "Contract count must be at least 1".to_string(),
            ));
        }
        Ok(Fill {
            order_id: format!("sim-{}", Uuid::new_v4()),
            filled_price: order.price,
        })
    }
}

// ── Live ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct BrokerOrderBody<'a> {
    pair: &'a str,
    side: &'a str,
    quantity: u32,
    stop_price: f64,
    target_price: f64,
}

#[derive(Debug, Deserialize)]
struct BrokerOrderResponse {
    order_id: String,
    filled_price: f64,
}

/// HMAC-authenticated REST client for the broker order endpoint
pub struct LiveExecution {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl LiveExecution {
    pub fn new(
        base_url: impl Into<String>,
        api_key: String,
        api_secret: String,
        timeout: Duration,
    ) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutionError::Api(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        })
    }

    /// signature = base64(hmac_sha256(secret, timestamp + method + path + body))
    fn sign(&self, timestamp: i64, method: &str, path: &str, body: &str) -> Result<String, ExecutionError> {
        let secret = general_purpose::STANDARD
            .decode(&self.api_secret)
            .map_err(|e| ExecutionError::Signing(format!("Bad API secret: {}", e)))?;
        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| ExecutionError::Signing(e.to_string()))?;
        mac.update(format!("{}{}{}{}", timestamp, method, path, body).as_bytes());
        Ok(general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl ExecutionEngine for LiveExecution {
    async fn submit(&self, order: &OrderRequest) -> Result<Fill, ExecutionError> {
        let path = "/orders/bracket";
        let body = BrokerOrderBody {
            pair: order.instrument.perp_pair(),
            side: match order.side {
                Side::Long => "BUY",
                Side::Short => "SELL",
            },
            quantity: order.contracts,
            stop_price: order.stop_price,
            target_price: order.target_price,
        };
        let body_json =
            serde_json::to_string(&body).map_err(|e| ExecutionError::Api(e.to_string()))?;

        let timestamp = now_ms();
        let signature = self.sign(timestamp, "POST", path, &body_json)?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("VB-ACCESS-KEY", &self.api_key)
            .header("VB-ACCESS-SIGN", signature)
            .header("VB-ACCESS-TIMESTAMP", timestamp.to_string())
            .header("Content-Type", "application/json")
            .body(body_json)
            .send()
            .await
            .map_err(|e| ExecutionError::Api(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExecutionError::Rejected(format!("{}: {}", status, detail)));
        }

        let parsed: BrokerOrderResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::Api(format!("Malformed fill response: {}", e)))?;

        Ok(Fill {
            order_id: parsed.order_id,
            filled_price: parsed.filled_price,
        })
    }
}
