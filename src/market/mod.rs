//! Markets for rotating binary up/down series.
//!
//! This module handles:
//! - Market types and data structures
//! - Market rotation (finding the window to trade)
//! - Polymarket API client (quotes, positions, orders)
//! - Simulated exchange for dry runs and tests

pub mod client;
pub mod discovery;
pub mod simulated;
pub mod types;

pub use client::PolymarketClient;
pub use discovery::{compute_slug, fetch_market_from_slug, MarketRotator, SlugRotator};
pub use simulated::SimulatedExchange;
pub use types::{GammaMarket, Leg, LegPair, Market};
