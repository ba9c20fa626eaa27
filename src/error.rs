//! Unified error types for the hedging bot.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::market::Leg;

/// Unified error type for the hedging bot.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Market-related error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// Quote feed error.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
}

/// Market rotation and lookup errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Failed to fetch market information.
    #[error("failed to fetch market {slug}: {reason}")]
    FetchFailed {
        /// The market slug that failed.
        slug: String,
        /// Reason for failure.
        reason: String,
    },

    /// Market is closed.
    #[error("market {slug} is closed")]
    MarketClosed {
        /// The closed market slug.
        slug: String,
    },

    /// Failed to parse market data.
    #[error("failed to parse market data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Order placement, cancellation and position errors.
#[derive(Error, Debug)]
pub enum TradingError {
    /// Placement was accepted but no order id came back.
    #[error("placement for {leg} at {price} returned no order id")]
    MissingOrderId {
        /// Target leg.
        leg: Leg,
        /// Requested price.
        price: Decimal,
    },

    /// Failed to cancel order.
    #[error("failed to cancel order {order_id}: {reason}")]
    CancelFailed {
        /// Order ID that failed to cancel.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to get order status.
    #[error("failed to get order status for {order_id}: {reason}")]
    StatusFailed {
        /// Order ID.
        order_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Venue does not know the order.
    #[error("unknown order {0}")]
    UnknownOrder(String),

    /// Remote position lookup failed.
    #[error("failed to fetch positions: {0}")]
    PositionsFailed(String),

    /// Invalid order parameters.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Signing error.
    #[error("signing error: {0}")]
    SigningError(String),

    /// Rate limited by the API.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_seconds: u64,
    },

    /// Order rejected by the exchange.
    #[error("order rejected: {reason}")]
    OrderRejected {
        /// Rejection reason from the exchange.
        reason: String,
    },

    /// Transport failure talking to the venue.
    #[error("transport error: {0}")]
    Transport(String),
}

impl TradingError {
    /// Whether the outcome of the request is unknown (the order may exist).
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            TradingError::Transport(_) | TradingError::MissingOrderId { .. }
        )
    }
}

/// Quote feed errors (push and pull).
#[derive(Error, Debug)]
pub enum FeedError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Message parsing failed.
    #[error("failed to parse feed message: {0}")]
    ParseError(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Pull refresh failed.
    #[error("quote fetch for {token_id} failed: {reason}")]
    FetchFailed {
        /// Token being refreshed.
        token_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
