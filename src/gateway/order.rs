//! Order types shared by the gateway and its venues.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::market::Leg;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order.
    #[strum(serialize = "BUY", serialize = "buy")]
    Buy,
    /// Sell order.
    #[strum(serialize = "SELL", serialize = "sell")]
    Sell,
}

/// How an order interacts with the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStyle {
    /// Rests on the book until filled or cancelled (GTC).
    Resting,
    /// Fills what is available now, remainder cancelled (FAK).
    Immediate,
}

impl OrderStyle {
    /// Venue order type string.
    pub fn venue_order_type(&self) -> &'static str {
        match self {
            OrderStyle::Resting => "GTC",
            OrderStyle::Immediate => "FAK",
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Live on the book, nothing filled.
    #[strum(
        serialize = "open",
        serialize = "live",
        serialize = "LIVE",
        serialize = "pending",
        serialize = "PENDING",
        serialize = "delayed",
        serialize = "DELAYED"
    )]
    Open,
    /// Live on the book with some size filled.
    #[strum(serialize = "partially_filled", serialize = "PARTIALLY_FILLED")]
    PartiallyFilled,
    /// Fully filled.
    #[strum(
        serialize = "filled",
        serialize = "FILLED",
        serialize = "matched",
        serialize = "MATCHED"
    )]
    Filled,
    /// Cancelled, expired or rejected; may carry a partial fill.
    #[strum(
        serialize = "cancelled",
        serialize = "canceled",
        serialize = "CANCELED",
        serialize = "CANCELLED",
        serialize = "unmatched",
        serialize = "UNMATCHED",
        serialize = "expired",
        serialize = "EXPIRED",
        serialize = "rejected",
        serialize = "REJECTED"
    )]
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal (won't change).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    /// Check if the order is still working on the book.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// Order request sent to a venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Target leg.
    pub leg: Leg,
    /// Token ID to trade.
    pub token_id: String,
    /// Order side (buy/sell).
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Order size in shares.
    pub size: Decimal,
    /// Resting or immediate.
    pub style: OrderStyle,
}

impl OrderRequest {
    /// Validate order parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_id.is_empty() {
            return Err("token_id is required".to_string());
        }
        if self.price <= Decimal::ZERO || self.price >= Decimal::ONE {
            return Err(format!("price {} outside (0, 1)", self.price));
        }
        if self.size <= Decimal::ZERO {
            return Err("size must be positive".to_string());
        }
        Ok(())
    }
}

/// Venue acknowledgement of a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceAck {
    /// Remote order id; `None` when the venue did not return one.
    pub order_id: Option<String>,
    /// Status at acknowledgement.
    pub status: OrderStatus,
    /// Size filled at acknowledgement.
    pub filled_size: Decimal,
    /// Average fill price, when anything filled.
    pub avg_fill_price: Option<Decimal>,
}

/// Venue answer to a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CancelOutcome {
    /// Order was live and is now cancelled.
    Cancelled,
    /// Order had already filled completely.
    AlreadyFilled,
    /// Order was already cancelled.
    AlreadyCancelled,
}

/// Current state of an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderState {
    /// Order ID.
    pub order_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Cumulative filled size.
    pub filled_size: Decimal,
    /// Average fill price, when anything filled.
    pub avg_fill_price: Option<Decimal>,
}

/// Open order as listed by the venue, used to correlate unacknowledged placements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueOrder {
    /// Order ID.
    pub order_id: String,
    /// Token ID.
    pub token_id: String,
    /// Side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Original size.
    pub size: Decimal,
    /// Creation time (unix milliseconds).
    pub created_at: i64,
}

/// One execution from the venue's trade history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueTrade {
    /// Our order that traded.
    pub order_id: String,
    /// Token ID.
    pub token_id: String,
    /// Side of our order.
    pub side: Side,
    /// Execution price.
    pub price: Decimal,
    /// Shares traded.
    pub size: Decimal,
    /// Match time (unix milliseconds).
    pub matched_at: i64,
}

/// Wall-clock time in unix milliseconds.
pub fn unix_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Live resting order owned by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHandle {
    /// Remote order id.
    pub order_id: String,
    /// Target leg.
    pub leg: Leg,
    /// Side.
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Requested size.
    pub size: Decimal,
    /// When the gateway placed it.
    pub placed_at: Instant,
}

/// Result of an immediate order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateFill {
    /// Remote order id, when known.
    pub order_id: Option<String>,
    /// Size filled (possibly zero).
    pub filled: Decimal,
    /// Average fill price, when anything filled.
    pub avg_price: Option<Decimal>,
}

impl ImmediateFill {
    /// Nothing filled.
    pub fn none() -> Self {
        Self {
            order_id: None,
            filled: Decimal::ZERO,
            avg_price: None,
        }
    }
}
