//! Duration-risk hedging bot for rotating Polymarket up/down markets.
//!
//! Each market window resolves one outcome token to $1 and the other to $0.
//! The bot buys one leg near 0.50, then hedges with the opposite leg while the
//! pair still costs less than the profit ceiling:
//!
//! ```text
//! UP   filled at: $0.40
//! DOWN hedged at: $0.50
//! ─────────────────────
//! Pair cost:      $0.90 <= $0.96 ceiling
//! Locked in:      $0.10 per share
//! ```
//!
//! The time between the two fills is the duration risk. The risk governor
//! stops new entries and finally unwinds whatever is still unhedged as the
//! window closes.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Market types, rotation, Polymarket client, simulated exchange
//! - [`feed`]: Quote cache with WebSocket push and REST pull
//! - [`gateway`]: Resting and immediate orders, cancels, status polling
//! - [`ledger`]: Local/remote position reconciliation
//! - [`risk`]: Risk phase from imbalance and time to expiry
//! - [`hedger`]: The hedging state machine
//! - [`driver`]: Market rotation and tick loop
//! - [`api`]: HTTP API for health and status

pub mod api;
pub mod config;
pub mod driver;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod hedger;
pub mod ledger;
pub mod market;
pub mod metrics;
pub mod risk;
pub mod signing;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
