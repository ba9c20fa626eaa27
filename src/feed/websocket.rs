//! WebSocket push feed for the Polymarket CLOB market channel.
//!
//! Maintains an L2 book per subscribed token and writes the top of book into
//! a [`QuoteFeed`] after every message. Reconnection with exponential backoff
//! happens inside the spawned task; readers only ever see the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::cache::QuoteFeed;
use super::types::Quote;
use crate::config::Config;
use crate::error::FeedError;
use crate::metrics;

/// L2 book state maintained from WebSocket updates.
#[derive(Debug, Clone, Default)]
pub struct L2BookState {
    /// Bid levels: price -> size.
    pub bids: HashMap<Decimal, Decimal>,
    /// Ask levels: price -> size.
    pub asks: HashMap<Decimal, Decimal>,
}

impl L2BookState {
    /// Apply a full book snapshot.
    pub fn apply_snapshot(&mut self, bids: Vec<WsLevel>, asks: Vec<WsLevel>) {
        self.bids = collect_levels(bids);
        self.asks = collect_levels(asks);
    }

    /// Apply a price change delta.
    pub fn apply_delta(&mut self, change: &WsPriceChange) {
        let (Ok(price), Ok(size)) = (change.price.parse::<Decimal>(), change.size.parse::<Decimal>())
        else {
            return;
        };

        let book = match change.side.to_uppercase().as_str() {
            "BUY" => &mut self.bids,
            "SELL" => &mut self.asks,
            _ => return,
        };

        if size <= Decimal::ZERO {
            book.remove(&price);
        } else {
            book.insert(price, size);
        }
    }

    /// Reduce the book to its best levels.
    pub fn top_of_book(&self) -> Quote {
        let best_bid = self.bids.iter().max_by_key(|(price, _)| **price);
        let best_ask = self.asks.iter().min_by_key(|(price, _)| **price);
        Quote::new(
            best_bid.map(|(price, _)| *price),
            best_ask.map(|(price, _)| *price),
            best_bid.map(|(_, size)| *size).unwrap_or(Decimal::ZERO),
            best_ask.map(|(_, size)| *size).unwrap_or(Decimal::ZERO),
        )
    }
}

fn collect_levels(levels: Vec<WsLevel>) -> HashMap<Decimal, Decimal> {
    levels
        .into_iter()
        .filter_map(|level| Some((level.price.parse().ok()?, level.size.parse().ok()?)))
        .filter(|(_, size): &(Decimal, Decimal)| *size > Decimal::ZERO)
        .collect()
}

/// Price level from WebSocket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WsLevel {
    /// Price as string.
    pub price: String,
    /// Size as string.
    pub size: String,
}

/// Price change from WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct WsPriceChange {
    /// Asset ID.
    pub asset_id: Option<String>,
    /// Price as string.
    pub price: String,
    /// Size as string.
    pub size: String,
    /// Side: "BUY" or "SELL".
    pub side: String,
}

/// WebSocket event from Polymarket.
#[derive(Debug, Clone, Deserialize)]
pub struct WsEvent {
    /// Event type: "book" or "price_change".
    pub event_type: Option<String>,
    /// Asset ID (for book events).
    pub asset_id: Option<String>,
    /// Bid levels (for book events).
    pub bids: Option<Vec<WsLevel>>,
    /// Ask levels (for book events).
    pub asks: Option<Vec<WsLevel>>,
    /// Price changes (for price_change events).
    pub price_changes: Option<Vec<WsPriceChange>>,
}

/// WebSocket subscription message.
#[derive(Debug, Serialize)]
struct SubscribeMessage {
    #[serde(rename = "type")]
    msg_type: &'static str,
    assets_ids: Vec<String>,
}

/// Reconnection configuration for WebSocket.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in seconds.
    pub max_delay_s: u64,
    /// Backoff multiplier (e.g., 2 for exponential).
    pub backoff_multiplier: u32,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_s: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_s: 30,
            backoff_multiplier: 2,
            heartbeat_interval_s: 30,
        }
    }
}

impl ReconnectConfig {
    /// Create from config values.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_delay_s: config.ws_reconnect_max_delay_s,
            heartbeat_interval_s: config.ws_heartbeat_interval_s,
            ..Default::default()
        }
    }

    /// Calculate next delay with exponential backoff.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.backoff_multiplier).saturating_pow(attempt.min(16));
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_s * 1000))
    }
}

/// Push feed for one set of tokens.
pub struct MarketWebSocket {
    books: DashMap<String, L2BookState>,
    ws_url: String,
    reconnect_config: ReconnectConfig,
    connected: AtomicBool,
    reconnect_attempts: AtomicU64,
}

impl MarketWebSocket {
    /// Create a new WebSocket client.
    pub fn new(ws_url: String, reconnect_config: ReconnectConfig) -> Self {
        Self {
            books: DashMap::new(),
            ws_url,
            reconnect_config,
            connected: AtomicBool::new(false),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get reconnection attempt count.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Spawn the connection loop; abort the handle to unsubscribe.
    pub fn spawn(self: Arc<Self>, feed: Arc<QuoteFeed>, asset_ids: Vec<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                match self.stream_once(&feed, &asset_ids).await {
                    Ok(()) => {
                        attempt = 0;
                        warn!("WebSocket stream ended, will reconnect");
                    }
                    Err(e) => error!(error = %e, attempt, "WebSocket connection failed"),
                }
                self.connected.store(false, Ordering::SeqCst);

                let delay = self.reconnect_config.next_delay(attempt);
                self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                metrics::inc_ws_reconnects();
                info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        })
    }

    /// Connect, subscribe and pump messages until the stream closes.
    async fn stream_once(&self, feed: &QuoteFeed, asset_ids: &[String]) -> Result<(), FeedError> {
        let url = format!("{}/ws/market", self.ws_url.trim_end_matches('/'));
        info!(url = %url, assets = ?asset_ids, "Connecting to WebSocket");

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = SubscribeMessage {
            msg_type: "MARKET",
            assets_ids: asset_ids.to_vec(),
        };
        let msg_json =
            serde_json::to_string(&subscribe).map_err(|e| FeedError::SendFailed(e.to_string()))?;
        write
            .send(Message::Text(msg_json))
            .await
            .map_err(|e| FeedError::SendFailed(e.to_string()))?;

        self.books.clear();
        for id in asset_ids {
            self.books.insert(id.clone(), L2BookState::default());
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(count = asset_ids.len(), "Subscribed to assets");

        let heartbeat = Duration::from_secs(self.reconnect_config.heartbeat_interval_s.max(1));
        loop {
            let next = tokio::time::timeout(heartbeat * 2, read.next()).await;
            let msg = match next {
                Err(_) => {
                    warn!("No WebSocket traffic within two heartbeats");
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(msg)) => msg?,
            };

            match msg {
                Message::Text(text) => {
                    metrics::inc_ws_messages_received();
                    for token in self.process_message(&text) {
                        if let Some(book) = self.books.get(&token) {
                            feed.update(&token, book.top_of_book());
                        }
                    }
                }
                Message::Ping(payload) => {
                    debug!("Received ping");
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(frame) => {
                    warn!(frame = ?frame, "WebSocket closed");
                    return Err(FeedError::ConnectionClosed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Apply a message to the books; returns the tokens it touched.
    fn process_message(&self, text: &str) -> Vec<String> {
        let events: Vec<WsEvent> = if text.trim_start().starts_with('[') {
            serde_json::from_str(text).unwrap_or_default()
        } else {
            serde_json::from_str(text).map(|e| vec![e]).unwrap_or_default()
        };

        let mut touched = Vec::new();
        for event in events {
            match event.event_type.as_deref() {
                Some("book") => {
                    let Some(asset_id) = event.asset_id else { continue };
                    if let Some(mut book) = self.books.get_mut(&asset_id) {
                        book.apply_snapshot(
                            event.bids.unwrap_or_default(),
                            event.asks.unwrap_or_default(),
                        );
                        touched.push(asset_id);
                    }
                }
                Some("price_change") => {
                    for change in event.price_changes.iter().flatten() {
                        let Some(asset_id) = change.asset_id.as_ref().or(event.asset_id.as_ref())
                        else {
                            continue;
                        };
                        if let Some(mut book) = self.books.get_mut(asset_id) {
                            book.apply_delta(change);
                            if !touched.contains(asset_id) {
                                touched.push(asset_id.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        touched
    }
}
