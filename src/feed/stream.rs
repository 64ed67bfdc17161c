//! Alpaca v2 market-data stream
//!
//! Connect, authenticate, subscribe to trades for the configured symbols,
//! then pump ticks into the queue until the stream ends, errors, or
//! shutdown is requested. Reconnection policy lives in the supervisor, not
//! here.

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Tick, TickQueue};
use crate::arguments::is_debug_feed_enabled;
use crate::errors::BotError;
use crate::logger::{self, LogTag};
use crate::shutdown;

#[derive(Debug, Serialize)]
struct AuthMessage {
    action: String,
    key: String,
    secret: String,
}

#[derive(Debug, Serialize)]
struct SubscribeMessage {
    action: String,
    trades: Vec<String>,
}

/// Incoming stream message; Alpaca sends arrays of these
#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "T")]
    msg_type: String,
    #[serde(rename = "S")]
    symbol: Option<String>,
    /// Trade price
    p: Option<f64>,
    /// Status/error text
    msg: Option<String>,
}

pub struct StreamConfig {
    pub url: String,
    pub key_id: String,
    pub secret: String,
    pub symbols: Vec<String>,
}

/// Run one stream session to completion
///
/// Returns Ok(()) only on shutdown; any other exit is an error the
/// supervisor turns into a reconnect.
pub async fn run_stream(
    config: &StreamConfig,
    queue: Arc<TickQueue>,
    last_tick_at: Arc<Mutex<Option<Instant>>>,
) -> Result<()> {
    let (ws_stream, _) = connect_async(&config.url)
        .await
        .map_err(|e| anyhow!(BotError::MarketData(format!("connect failed: {}", e))))?;
    let (mut sender, mut receiver) = ws_stream.split();

    let auth = AuthMessage {
        action: "auth".to_string(),
        key: config.key_id.clone(),
        secret: config.secret.clone(),
    };
    sender
        .send(Message::Text(serde_json::to_string(&auth)?))
        .await
        .map_err(|e| anyhow!(BotError::MarketData(format!("auth send failed: {}", e))))?;

    let subscribe = SubscribeMessage {
        action: "subscribe".to_string(),
        trades: config.symbols.clone(),
    };
    sender
        .send(Message::Text(serde_json::to_string(&subscribe)?))
        .await
        .map_err(|e| anyhow!(BotError::MarketData(format!("subscribe send failed: {}", e))))?;

    logger::info(
        LogTag::Feed,
        &format!("stream connected, subscribing trades: {:?}", config.symbols),
    );

    loop {
        let message = tokio::select! {
            m = receiver.next() => m,
            _ = shutdown::wait_for_shutdown() => {
                logger::info(LogTag::Feed, "stream closing on shutdown");
                let _ = sender.send(Message::Close(None)).await;
                return Ok(());
            }
        };

        let message = match message {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                return Err(anyhow!(BotError::MarketData(format!("stream error: {}", e))))
            }
            None => return Err(anyhow!(BotError::MarketData("stream ended".to_string()))),
        };

        match message {
            Message::Text(text) => {
                handle_text(&text, &queue, &last_tick_at);
            }
            Message::Ping(payload) => {
                let _ = sender.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => {
                return Err(anyhow!(BotError::MarketData(
                    "stream closed by venue".to_string()
                )));
            }
            _ => {}
        }
    }
}

fn handle_text(text: &str, queue: &TickQueue, last_tick_at: &Mutex<Option<Instant>>) {
    let messages: Vec<StreamMessage> = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            logger::debug(
                LogTag::Feed,
                &format!("unparseable stream payload ({}): {}", e, text),
            );
            return;
        }
    };

    for m in messages {
        match m.msg_type.as_str() {
            "t" => {
                if let (Some(symbol), Some(price)) = (m.symbol, m.p) {
                    if is_debug_feed_enabled() {
                        logger::debug(LogTag::Feed, &format!("tick {} @ {:.4}", symbol, price));
                    }
                    *last_tick_at.lock() = Some(Instant::now());
                    queue.push(Tick {
                        symbol,
                        price,
                        at: chrono::Utc::now(),
                    });
                }
            }
            "success" => {
                if let Some(msg) = m.msg {
                    logger::debug(LogTag::Feed, &format!("stream: {}", msg));
                }
            }
            "error" => {
                logger::error(
                    LogTag::Feed,
                    &format!("stream error: {}", m.msg.unwrap_or_default()),
                );
            }
            "subscription" => {
                logger::debug(LogTag::Feed, "subscription confirmed");
            }
            _ => {}
        }
    }
}
