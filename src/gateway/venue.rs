//! Order venue abstraction.

use async_trait::async_trait;

use super::order::{CancelOutcome, OrderRequest, OrderState, PlaceAck, VenueOrder, VenueTrade};
use crate::error::TradingError;

/// An exchange (or simulation of one) that accepts orders.
#[async_trait]
pub trait OrderVenue: Send + Sync {
    /// Submit an order.
    async fn place(&self, request: &OrderRequest) -> Result<PlaceAck, TradingError>;

    /// Cancel an order by id.
    async fn cancel(&self, order_id: &str) -> Result<CancelOutcome, TradingError>;

    /// Current status of an order.
    async fn status(&self, order_id: &str) -> Result<OrderState, TradingError>;

    /// Open orders for a token.
    async fn open_orders(&self, token_id: &str) -> Result<Vec<VenueOrder>, TradingError>;

    /// Recent executions of our orders on a token.
    async fn recent_trades(&self, token_id: &str) -> Result<Vec<VenueTrade>, TradingError>;
}
