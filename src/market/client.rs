//! Polymarket API client wrapper.

use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{FeedError, TradingError};
use crate::feed::{Quote, QuoteSource};
use crate::ledger::{ApiPosition, PositionSource, RemotePosition};
use crate::metrics;
use crate::signing::RequestSigner;

/// Polymarket CLOB and data API client.
#[derive(Debug, Clone)]
pub struct PolymarketClient {
    /// HTTP client for API requests.
    http: reqwest::Client,
    /// Base URL for CLOB API.
    clob_url: String,
    /// Base URL for the positions API.
    data_url: String,
    /// Request signer; absent when no key is configured.
    signer: Option<RequestSigner>,
    /// Chain ID (137 for Polygon).
    chain_id: u64,
}

/// Order book response from API.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookResponse {
    /// Bid levels.
    pub bids: Option<Vec<OrderLevel>>,
    /// Ask levels.
    pub asks: Option<Vec<OrderLevel>>,
    /// Asset ID.
    pub asset_id: Option<String>,
}

/// Single price level in order book.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderLevel {
    /// Price at this level.
    pub price: String,
    /// Size available at this level.
    pub size: String,
}

impl OrderBookResponse {
    /// Reduce a full book to its top level on each side.
    pub fn top_of_book(&self) -> Quote {
        let parse = |levels: &Option<Vec<OrderLevel>>| -> Vec<(Decimal, Decimal)> {
            levels
                .iter()
                .flatten()
                .filter_map(|level| {
                    let price: Decimal = level.price.parse().ok()?;
                    let size: Decimal = level.size.parse().ok()?;
                    (size > Decimal::ZERO).then_some((price, size))
                })
                .collect()
        };

        let best_bid = parse(&self.bids).into_iter().max_by_key(|(p, _)| *p);
        let best_ask = parse(&self.asks).into_iter().min_by_key(|(p, _)| *p);

        Quote::new(
            best_bid.map(|(p, _)| p),
            best_ask.map(|(p, _)| p),
            best_bid.map(|(_, s)| s).unwrap_or(Decimal::ZERO),
            best_ask.map(|(_, s)| s).unwrap_or(Decimal::ZERO),
        )
    }
}

impl PolymarketClient {
    /// Create a client from config with low-latency HTTP settings.
    pub fn new(config: &Config) -> Result<Self, TradingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(Duration::from_millis(500))
            // Disable Nagle for small order payloads
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(config.http_pool_size)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TradingError::Transport(format!("failed to create HTTP client: {}", e)))?;

        let signer = if config.polymarket_private_key.is_empty() {
            None
        } else {
            Some(RequestSigner::new(
                &config.polymarket_private_key,
                config.polymarket_signature_type,
                config.polymarket_funder.clone(),
            )?)
        };

        Ok(Self {
            http,
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            data_url: config.polymarket_data_url.trim_end_matches('/').to_string(),
            signer,
            chain_id: 137,
        })
    }

    /// Get the HTTP client reference.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Get the CLOB base URL.
    pub fn clob_url(&self) -> &str {
        &self.clob_url
    }

    /// Get the chain ID.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signer for authenticated calls.
    pub fn signer(&self) -> Result<&RequestSigner, TradingError> {
        self.signer
            .as_ref()
            .ok_or_else(|| TradingError::SigningError("no private key configured".to_string()))
    }

    /// Get the wallet address derived from the private key.
    pub fn get_address(&self) -> Result<String, TradingError> {
        Ok(self.signer()?.address())
    }

    /// Get the full order book for a token.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_order_book(&self, token_id: &str) -> Result<OrderBookResponse, FeedError> {
        let fetch_failed = |reason: String| FeedError::FetchFailed {
            token_id: token_id.to_string(),
            reason,
        };

        let response = self
            .http
            .get(format!("{}/book", self.clob_url))
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_failed(format!("HTTP {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| fetch_failed(format!("failed to parse order book: {}", e)))
    }
}

#[async_trait]
impl QuoteSource for PolymarketClient {
    async fn fetch_quote(&self, token_id: &str) -> Result<Quote, FeedError> {
        let start = StdInstant::now();
        let book = self.get_order_book(token_id).await;
        metrics::record_quote_fetch_latency(start);
        Ok(book?.top_of_book())
    }
}

#[async_trait]
impl PositionSource for PolymarketClient {
    #[instrument(skip(self), level = "debug")]
    async fn positions(&self) -> Result<Vec<RemotePosition>, TradingError> {
        let user = self.signer()?.maker_address();

        let response = self
            .http
            .get(format!("{}/positions", self.data_url))
            .query(&[("user", user.as_str()), ("sizeThreshold", "0")])
            .send()
            .await
            .map_err(|e| TradingError::PositionsFailed(e.to_string()))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Failed to get positions");
            return Err(TradingError::PositionsFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let rows: Vec<ApiPosition> = response
            .json()
            .await
            .map_err(|e| TradingError::PositionsFailed(format!("failed to parse positions: {}", e)))?;

        let positions: Vec<_> = rows.iter().filter_map(ApiPosition::to_remote).collect();
        debug!(count = positions.len(), "Retrieved positions");
        Ok(positions)
    }
}
