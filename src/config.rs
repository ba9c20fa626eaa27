//! Application configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Polymarket Credentials ===
    /// Wallet private key (hex, starts with 0x). Optional in dry run.
    #[serde(default)]
    pub polymarket_private_key: String,

    /// Signature type: 0=EOA, 1=Magic.link, 2=Gnosis Safe.
    #[serde(default)]
    pub polymarket_signature_type: u8,

    /// Proxy wallet address (required for Magic.link).
    #[serde(default)]
    pub polymarket_funder: Option<String>,

    // === Endpoints ===
    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub polymarket_clob_url: String,

    /// WebSocket base URL.
    #[serde(default = "default_ws_url")]
    pub polymarket_ws_url: String,

    /// Gamma markets endpoint.
    #[serde(default = "default_gamma_url")]
    pub polymarket_gamma_url: String,

    /// Data API base URL (positions).
    #[serde(default = "default_data_url")]
    pub polymarket_data_url: String,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Idle HTTP connections kept per host.
    #[serde(default = "default_http_pool_size")]
    pub http_pool_size: usize,

    // === Market Series ===
    /// Slug prefix of the rotating series (e.g., "btc-updown-15m").
    #[serde(default = "default_slug_prefix")]
    pub market_slug_prefix: String,

    /// Length of one market window in seconds.
    #[serde(default = "default_window_seconds")]
    pub market_window_seconds: i64,

    /// Force specific market slug (bypasses rotation).
    #[serde(default)]
    pub polymarket_market_slug: Option<String>,

    // === Strategy Parameters ===
    /// Shares per entry order.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Maximum combined cost of a hedged pair (e.g., 0.96).
    #[serde(default = "default_profit_ceiling")]
    pub profit_ceiling: Decimal,

    /// Highest price paid for a first leg.
    #[serde(default = "default_max_entry_price")]
    pub max_entry_price: Decimal,

    /// Skip entries when entry price + opposite best ask exceeds this.
    #[serde(default = "default_entry_pair_cost_limit")]
    pub entry_pair_cost_limit: Decimal,

    /// Lowest price a resting bid may carry.
    #[serde(default = "default_min_bid")]
    pub min_bid: Decimal,

    /// Highest price a resting bid may carry.
    #[serde(default = "default_max_bid")]
    pub max_bid: Decimal,

    /// Lowest tolerable price when unwinding.
    #[serde(default = "default_min_sell_price")]
    pub min_sell_price: Decimal,

    /// Largest tolerated share imbalance before new exposure is blocked.
    #[serde(default = "default_max_imbalance")]
    pub max_imbalance: Decimal,

    /// Interval between first-leg reprices.
    #[serde(default = "default_first_leg_bump_ms")]
    pub first_leg_bump_ms: u64,

    /// Give up on an unfilled first leg after this long.
    #[serde(default = "default_first_leg_timeout_ms")]
    pub first_leg_timeout_ms: u64,

    /// Interval between hedge reprices.
    #[serde(default = "default_hedge_bump_ms")]
    pub hedge_bump_ms: u64,

    /// Give up on a resting hedge after this long.
    #[serde(default = "default_hedge_timeout_ms")]
    pub hedge_timeout_ms: u64,

    /// Unwind an unhedged leg after this long without a profitable hedge.
    #[serde(default = "default_unhedged_timeout_ms")]
    pub unhedged_timeout_ms: u64,

    /// Stop opening new exposure below this many seconds to expiry.
    #[serde(default = "default_stop_new_trades_seconds")]
    pub stop_new_trades_seconds: u64,

    /// Force-close any imbalance below this many seconds to expiry.
    #[serde(default = "default_force_close_seconds")]
    pub force_close_seconds: u64,

    // === Loop Cadence ===
    /// Tick interval while scanning.
    #[serde(default = "default_scan_tick_ms")]
    pub scan_tick_ms: u64,

    /// Tick interval while chasing a first leg.
    #[serde(default = "default_chase_tick_ms")]
    pub chase_tick_ms: u64,

    /// Tick interval while waiting on a hedge.
    #[serde(default = "default_hedge_tick_ms")]
    pub hedge_tick_ms: u64,

    /// Tick interval while unwinding.
    #[serde(default = "default_force_close_tick_ms")]
    pub force_close_tick_ms: u64,

    /// Push quotes older than this trigger a pull refresh.
    #[serde(default = "default_quote_stale_ms")]
    pub quote_stale_ms: u64,

    /// Enable WebSocket market feed in addition to polling.
    #[serde(default = "default_true")]
    pub use_wss: bool,

    // === Order Gateway ===
    /// How long an immediate order may take to reach a terminal status.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,

    /// Poll interval for order status.
    #[serde(default = "default_order_poll_interval_ms")]
    pub order_poll_interval_ms: u64,

    /// Window used to match an unacknowledged placement to an open order.
    #[serde(default = "default_correlation_window_ms")]
    pub correlation_window_ms: u64,

    // === Operation Modes ===
    /// Paper trading against live quotes (no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// HTTP server port for health/status endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Expose Prometheus metrics.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Prometheus exporter port.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Maximum WebSocket reconnect backoff in seconds.
    #[serde(default = "default_ws_reconnect_max_delay_s")]
    pub ws_reconnect_max_delay_s: u64,

    /// WebSocket heartbeat interval in seconds.
    #[serde(default = "default_ws_heartbeat_interval_s")]
    pub ws_heartbeat_interval_s: u64,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_data_url() -> String {
    "https://data-api.polymarket.com".to_string()
}

fn default_http_timeout_ms() -> u64 {
    2000
}

fn default_http_pool_size() -> usize {
    10
}

fn default_slug_prefix() -> String {
    "btc-updown-15m".to_string()
}

fn default_window_seconds() -> i64 {
    900
}

fn default_order_size() -> Decimal {
    Decimal::new(10, 0)
}

fn default_profit_ceiling() -> Decimal {
    Decimal::new(96, 2) // 0.96
}

fn default_max_entry_price() -> Decimal {
    Decimal::new(55, 2)
}

fn default_entry_pair_cost_limit() -> Decimal {
    Decimal::new(105, 2)
}

fn default_min_bid() -> Decimal {
    Decimal::new(2, 2)
}

fn default_max_bid() -> Decimal {
    Decimal::new(90, 2)
}

fn default_min_sell_price() -> Decimal {
    Decimal::new(1, 2)
}

fn default_max_imbalance() -> Decimal {
    Decimal::new(10, 0)
}

fn default_first_leg_bump_ms() -> u64 {
    5_000
}

fn default_first_leg_timeout_ms() -> u64 {
    60_000
}

fn default_hedge_bump_ms() -> u64 {
    30_000
}

fn default_hedge_timeout_ms() -> u64 {
    180_000
}

fn default_unhedged_timeout_ms() -> u64 {
    120_000
}

fn default_stop_new_trades_seconds() -> u64 {
    330
}

fn default_force_close_seconds() -> u64 {
    300
}

fn default_scan_tick_ms() -> u64 {
    1_000
}

fn default_chase_tick_ms() -> u64 {
    500
}

fn default_hedge_tick_ms() -> u64 {
    2_000
}

fn default_force_close_tick_ms() -> u64 {
    200
}

fn default_quote_stale_ms() -> u64 {
    3_000
}

fn default_order_timeout_ms() -> u64 {
    3_000
}

fn default_order_poll_interval_ms() -> u64 {
    250
}

fn default_correlation_window_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_ws_reconnect_max_delay_s() -> u64 {
    30
}

fn default_ws_heartbeat_interval_s() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Typed strategy parameters consumed by the hedging state machine.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    /// Shares per entry order.
    pub order_size: Decimal,
    /// Maximum combined cost of a hedged pair.
    pub profit_ceiling: Decimal,
    /// Highest price paid for a first leg.
    pub max_entry_price: Decimal,
    /// Entry price + opposite best ask above this means hedging is out of reach.
    pub entry_pair_cost_limit: Decimal,
    /// Lower bound for any resting bid.
    pub min_bid: Decimal,
    /// Upper bound for any resting bid.
    pub max_bid: Decimal,
    /// Lowest tolerable sell price.
    pub min_sell_price: Decimal,
    /// Largest tolerated share imbalance.
    pub max_imbalance: Decimal,
    /// First-leg reprice interval.
    pub first_leg_bump: Duration,
    /// First-leg give-up deadline.
    pub first_leg_timeout: Duration,
    /// Hedge reprice interval.
    pub hedge_bump: Duration,
    /// Hedge give-up deadline.
    pub hedge_timeout: Duration,
    /// Unhedged-leg deadline before unwinding.
    pub unhedged_timeout: Duration,
    /// Tick cadence per activity.
    pub cadence: TickCadence,
}

/// Driver tick intervals.
#[derive(Debug, Clone, Copy)]
pub struct TickCadence {
    /// While scanning.
    pub scan: Duration,
    /// While chasing a first leg.
    pub chase: Duration,
    /// While waiting on a hedge.
    pub hedge: Duration,
    /// While unwinding.
    pub force_close: Duration,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            order_size: default_order_size(),
            profit_ceiling: default_profit_ceiling(),
            max_entry_price: default_max_entry_price(),
            entry_pair_cost_limit: default_entry_pair_cost_limit(),
            min_bid: default_min_bid(),
            max_bid: default_max_bid(),
            min_sell_price: default_min_sell_price(),
            max_imbalance: default_max_imbalance(),
            first_leg_bump: Duration::from_millis(default_first_leg_bump_ms()),
            first_leg_timeout: Duration::from_millis(default_first_leg_timeout_ms()),
            hedge_bump: Duration::from_millis(default_hedge_bump_ms()),
            hedge_timeout: Duration::from_millis(default_hedge_timeout_ms()),
            unhedged_timeout: Duration::from_millis(default_unhedged_timeout_ms()),
            cadence: TickCadence {
                scan: Duration::from_millis(default_scan_tick_ms()),
                chase: Duration::from_millis(default_chase_tick_ms()),
                hedge: Duration::from_millis(default_hedge_tick_ms()),
                force_close: Duration::from_millis(default_force_close_tick_ms()),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.dry_run {
            if self.polymarket_private_key.is_empty() {
                return Err("POLYMARKET_PRIVATE_KEY is required".to_string());
            }
            if !self.polymarket_private_key.starts_with("0x") {
                return Err("POLYMARKET_PRIVATE_KEY must start with 0x".to_string());
            }
        }

        if self.order_size < Decimal::new(5, 0) {
            return Err("ORDER_SIZE must be at least 5".to_string());
        }

        if self.profit_ceiling >= Decimal::ONE {
            return Err("PROFIT_CEILING must be less than 1.0".to_string());
        }

        if self.min_bid <= Decimal::ZERO || self.min_bid >= self.max_bid {
            return Err("MIN_BID must be positive and below MAX_BID".to_string());
        }

        if self.max_bid >= Decimal::ONE {
            return Err("MAX_BID must be less than 1.0".to_string());
        }

        if self.max_imbalance <= Decimal::ZERO {
            return Err("MAX_IMBALANCE must be positive".to_string());
        }

        if self.force_close_seconds >= self.stop_new_trades_seconds {
            return Err("FORCE_CLOSE_SECONDS must be below STOP_NEW_TRADES_SECONDS".to_string());
        }

        if self.market_window_seconds <= 0 {
            return Err("MARKET_WINDOW_SECONDS must be positive".to_string());
        }

        for (name, value, schemes) in [
            ("POLYMARKET_CLOB_URL", &self.polymarket_clob_url, &["http", "https"][..]),
            ("POLYMARKET_GAMMA_URL", &self.polymarket_gamma_url, &["http", "https"][..]),
            ("POLYMARKET_DATA_URL", &self.polymarket_data_url, &["http", "https"][..]),
            ("POLYMARKET_WS_URL", &self.polymarket_ws_url, &["ws", "wss"][..]),
        ] {
            let parsed = Url::parse(value).map_err(|e| format!("{} is invalid: {}", name, e))?;
            if !schemes.contains(&parsed.scheme()) {
                return Err(format!("{} must use one of {:?}", name, schemes));
            }
        }

        Ok(())
    }

    /// Derive the typed strategy parameters.
    pub fn strategy(&self) -> StrategyParams {
        StrategyParams {
            order_size: self.order_size,
            profit_ceiling: self.profit_ceiling,
            max_entry_price: self.max_entry_price,
            entry_pair_cost_limit: self.entry_pair_cost_limit,
            min_bid: self.min_bid,
            max_bid: self.max_bid,
            min_sell_price: self.min_sell_price,
            max_imbalance: self.max_imbalance,
            first_leg_bump: Duration::from_millis(self.first_leg_bump_ms),
            first_leg_timeout: Duration::from_millis(self.first_leg_timeout_ms),
            hedge_bump: Duration::from_millis(self.hedge_bump_ms),
            hedge_timeout: Duration::from_millis(self.hedge_timeout_ms),
            unhedged_timeout: Duration::from_millis(self.unhedged_timeout_ms),
            cadence: TickCadence {
                scan: Duration::from_millis(self.scan_tick_ms),
                chase: Duration::from_millis(self.chase_tick_ms),
                hedge: Duration::from_millis(self.hedge_tick_ms),
                force_close: Duration::from_millis(self.force_close_tick_ms),
            },
        }
    }

    /// Thresholds for the risk governor.
    pub fn risk_thresholds(&self) -> crate::risk::RiskThresholds {
        crate::risk::RiskThresholds {
            stop_new_trades: Duration::from_secs(self.stop_new_trades_seconds),
            force_close: Duration::from_secs(self.force_close_seconds),
            max_imbalance: self.max_imbalance,
        }
    }

    /// Check if using Magic.link (signature_type == 1).
    pub fn is_magic_link(&self) -> bool {
        self.polymarket_signature_type == 1
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        polymarket_private_key:
            "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string(),
        polymarket_signature_type: 0,
        polymarket_funder: None,
        polymarket_clob_url: default_clob_url(),
        polymarket_ws_url: "wss://test".to_string(),
        polymarket_gamma_url: default_gamma_url(),
        polymarket_data_url: default_data_url(),
        http_timeout_ms: default_http_timeout_ms(),
        http_pool_size: default_http_pool_size(),
        market_slug_prefix: default_slug_prefix(),
        market_window_seconds: default_window_seconds(),
        polymarket_market_slug: None,
        order_size: default_order_size(),
        profit_ceiling: default_profit_ceiling(),
        max_entry_price: default_max_entry_price(),
        entry_pair_cost_limit: default_entry_pair_cost_limit(),
        min_bid: default_min_bid(),
        max_bid: default_max_bid(),
        min_sell_price: default_min_sell_price(),
        max_imbalance: default_max_imbalance(),
        first_leg_bump_ms: default_first_leg_bump_ms(),
        first_leg_timeout_ms: default_first_leg_timeout_ms(),
        hedge_bump_ms: default_hedge_bump_ms(),
        hedge_timeout_ms: default_hedge_timeout_ms(),
        unhedged_timeout_ms: default_unhedged_timeout_ms(),
        stop_new_trades_seconds: default_stop_new_trades_seconds(),
        force_close_seconds: default_force_close_seconds(),
        scan_tick_ms: default_scan_tick_ms(),
        chase_tick_ms: default_chase_tick_ms(),
        hedge_tick_ms: default_hedge_tick_ms(),
        force_close_tick_ms: default_force_close_tick_ms(),
        quote_stale_ms: default_quote_stale_ms(),
        use_wss: false,
        order_timeout_ms: default_order_timeout_ms(),
        order_poll_interval_ms: default_order_poll_interval_ms(),
        correlation_window_ms: default_correlation_window_ms(),
        dry_run: true,
        port: default_port(),
        metrics_enabled: false,
        metrics_port: default_metrics_port(),
        ws_reconnect_max_delay_s: default_ws_reconnect_max_delay_s(),
        ws_heartbeat_interval_s: default_ws_heartbeat_interval_s(),
        rust_log: default_log_level(),
    }
}
