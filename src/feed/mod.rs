//! Quote feed: push updates merged into a bounded-staleness cache.
//!
//! This module handles:
//! - Top-of-book quote types
//! - The quote cache with its pull fallback
//! - WebSocket connection for real-time updates

pub mod cache;
pub mod types;
pub mod websocket;

pub use cache::{QuoteFeed, QuoteSource};
pub use types::{Quote, QuoteSnapshot, QuoteView};
pub use websocket::{L2BookState, MarketWebSocket, ReconnectConfig};
