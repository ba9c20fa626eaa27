//! Order gateway.
//!
//! [`OrderGateway`] is the only path orders take to a venue. It places
//! resting and immediate orders, polls their status and cancels them, and
//! recovers placements whose acknowledgement was lost.

mod clob;
mod execution;
mod order;
mod venue;

pub use execution::{GatewaySettings, OrderGateway};
pub use order::{
    CancelOutcome, ImmediateFill, OrderHandle, OrderRequest, OrderState, OrderStatus, OrderStyle,
    PlaceAck, Side, VenueOrder, VenueTrade, unix_millis,
};
pub use venue::OrderVenue;
