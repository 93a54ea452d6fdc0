//! Coinbase Advanced Trade WebSocket client
//!
//! Subscribes to the ticker channel for the configured instruments and
//! streams normalized ticks to the monitor. Reconnection is the caller's
//! responsibility; this client reports disconnects and returns.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::feed::FeedEvent;
use crate::types::{now_ms, Instrument};

pub const COINBASE_WS_URL: &str = "wss://advanced-trade-ws.coinbase.com";

#[derive(Debug, Clone, Serialize)]
struct SubscribeMsg {
    #[serde(rename = "type")]
    msg_type: String,
    product_ids: Vec<String>,
    channel: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TickerMessage {
    channel: String,
    events: Option<Vec<TickerEvent>>,
}

#[derive(Debug, Clone, Deserialize)]
struct TickerEvent {
    #[serde(rename = "type")]
    event_type: String,
    tickers: Option<Vec<Ticker>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ticker {
    product_id: String,
    price: String,
}

/// WebSocket feed client for Coinbase Advanced Trade
#[derive(Debug, Clone)]
pub struct CoinbaseFeed {
    url: String,
    instruments: Vec<Instrument>,
}

impl CoinbaseFeed {
    pub fn new(url: impl Into<String>, instruments: Vec<Instrument>) -> Self {
        Self {
            url: url.into(),
            instruments,
        }
    }

    /// Connect, subscribe, and stream ticks until the connection drops.
    /// Returns once disconnected so the caller can schedule a reconnect.
    pub async fn run(&self, tx: Sender<FeedEvent>) -> Result<()> {
        if self.instruments.is_empty() {
            bail!("No instruments configured for the Coinbase feed");
        }

        let product_ids: Vec<String> = self
            .instruments
            .iter()
            .map(|i| i.spot_pair().to_string())
            .collect();

        tracing::info!(url = %self.url, products = ?product_ids, "Connecting to Coinbase WebSocket...");

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .context("Failed to connect to Coinbase WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        let sub_msg = SubscribeMsg {
            msg_type: "subscribe".to_string(),
            product_ids,
            channel: "ticker".to_string(),
        };
        write
            .send(Message::Text(serde_json::to_string(&sub_msg)?))
            .await
            .context("Failed to send ticker subscription")?;

        let _ = tx.send(FeedEvent::Connected).await;
        tracing::info!("✅ Connected to Coinbase WebSocket");

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    // Malformed frames are skipped, never fatal.
                    if let Err(e) = Self::handle_message(&text, &tx).await {
                        tracing::debug!(error = %e, "Skipping unparseable feed message");
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    tracing::warn!("Feed connection closed by server");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket error");
                    let _ = tx.send(FeedEvent::Error(e.to_string())).await;
                    break;
                }
                _ => {}
            }
        }

        let _ = tx.send(FeedEvent::Disconnected).await;
        Ok(())
    }

    async fn handle_message(text: &str, tx: &Sender<FeedEvent>) -> Result<()> {
        let msg: TickerMessage = serde_json::from_str(text)?;
        if msg.channel != "ticker" {
            return Ok(());
        }

        let events = match msg.events {
            Some(e) => e,
            None => return Ok(()),
        };

        for event in events {
            if event.event_type != "update" && event.event_type != "snapshot" {
                continue;
            }
            let tickers = match event.tickers {
                Some(t) => t,
                None => continue,
            };
            for ticker in tickers {
                let instrument = match Instrument::parse(&ticker.product_id) {
                    Some(i) => i,
                    None => continue,
                };
                let price = match ticker.price.parse::<f64>() {
                    Ok(p) if p > 0.0 => p,
                    _ => continue,
                };
                // Stamped on receipt: upstream ordering is not trusted.
                let _ = tx
                    .send(FeedEvent::Tick {
                        instrument,
                        price,
                        ts: now_ms(),
                    })
                    .await;
            }
        }

        Ok(())
    }
}
