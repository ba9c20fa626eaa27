//! Prometheus metrics for order flow, hedging and feed health.
//!
//! Metric names are constants so dashboards and tests agree on them.
//! Descriptions are registered once by [`init_metrics`].

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{debug, info, warn};

use crate::gateway::OrderStyle;
use crate::market::Leg;

// === Metric Name Constants ===

/// Order placement latency metric name.
pub const METRIC_ORDER_LATENCY: &str = "order_latency_ms";
/// Ledger refresh latency metric name.
pub const METRIC_LEDGER_REFRESH_LATENCY: &str = "ledger_refresh_latency_ms";
/// Quote pull latency metric name.
pub const METRIC_QUOTE_FETCH_LATENCY: &str = "quote_fetch_latency_ms";
/// Orders placed counter metric name.
pub const METRIC_ORDERS_PLACED: &str = "orders_placed_total";
/// Orders filled counter metric name.
pub const METRIC_ORDERS_FILLED: &str = "orders_filled_total";
/// Orders cancelled counter metric name.
pub const METRIC_ORDERS_CANCELLED: &str = "orders_cancelled_total";
/// Orders failed counter metric name.
pub const METRIC_ORDERS_FAILED: &str = "orders_failed_total";
/// Hedged pairs completed counter metric name.
pub const METRIC_HEDGES_COMPLETED: &str = "hedges_completed_total";
/// Force-closes started counter metric name.
pub const METRIC_FORCE_CLOSES: &str = "force_closes_total";
/// State transitions counter metric name.
pub const METRIC_STATE_TRANSITIONS: &str = "hedge_state_transitions_total";
/// Current share imbalance gauge metric name.
pub const METRIC_IMBALANCE: &str = "position_imbalance_shares";
/// Cumulative locked-in profit gauge metric name.
pub const METRIC_CUMULATIVE_PROFIT: &str = "cumulative_profit_usd";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";
/// Market rotations counter metric name.
pub const METRIC_MARKET_ROTATIONS: &str = "market_rotations_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(METRIC_ORDER_LATENCY, "Order placement latency in milliseconds");
    describe_histogram!(
        METRIC_LEDGER_REFRESH_LATENCY,
        "Remote position refresh latency in milliseconds"
    );
    describe_histogram!(
        METRIC_QUOTE_FETCH_LATENCY,
        "Pull quote refresh latency in milliseconds"
    );

    describe_counter!(METRIC_ORDERS_PLACED, "Total number of orders placed");
    describe_counter!(METRIC_ORDERS_FILLED, "Total number of orders with fills");
    describe_counter!(METRIC_ORDERS_CANCELLED, "Total number of orders cancelled");
    describe_counter!(METRIC_ORDERS_FAILED, "Total number of orders that failed");
    describe_counter!(METRIC_HEDGES_COMPLETED, "Total number of hedged pairs completed");
    describe_counter!(METRIC_FORCE_CLOSES, "Total number of force-close unwinds started");
    describe_counter!(METRIC_STATE_TRANSITIONS, "Hedge state machine transitions by target state");
    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(METRIC_WS_RECONNECTS, "Total number of WebSocket reconnections");
    describe_counter!(METRIC_MARKET_ROTATIONS, "Total number of market rotations");

    describe_gauge!(METRIC_IMBALANCE, "Reconciled share imbalance of the active market");
    describe_gauge!(METRIC_CUMULATIVE_PROFIT, "Locked-in profit across all markets in USD");

    debug!("Metrics initialized");
}

/// Serve Prometheus metrics on `addr`. Failure is logged, not fatal.
pub fn install_prometheus(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "Prometheus exporter listening"),
        Err(e) => warn!(%addr, error = %e, "Prometheus exporter failed, continuing without it"),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Record order placement latency.
pub fn record_order_latency(start: Instant, style: OrderStyle) {
    histogram!(METRIC_ORDER_LATENCY, "style" => style.to_string()).record(elapsed_ms(start));
}

/// Record remote position refresh latency.
pub fn record_ledger_refresh_latency(start: Instant) {
    histogram!(METRIC_LEDGER_REFRESH_LATENCY).record(elapsed_ms(start));
}

/// Record pull quote latency.
pub fn record_quote_fetch_latency(start: Instant) {
    histogram!(METRIC_QUOTE_FETCH_LATENCY).record(elapsed_ms(start));
}

/// Increment orders placed counter.
pub fn inc_orders_placed(leg: Leg, style: OrderStyle) {
    counter!(METRIC_ORDERS_PLACED, "leg" => leg.to_string(), "style" => style.to_string())
        .increment(1);
}

/// Increment orders filled counter.
pub fn inc_orders_filled(leg: Leg) {
    counter!(METRIC_ORDERS_FILLED, "leg" => leg.to_string()).increment(1);
}

/// Increment orders cancelled counter.
pub fn inc_orders_cancelled() {
    counter!(METRIC_ORDERS_CANCELLED).increment(1);
}

/// Increment orders failed counter.
pub fn inc_orders_failed() {
    counter!(METRIC_ORDERS_FAILED).increment(1);
}

/// Increment hedges completed counter.
pub fn inc_hedges_completed() {
    counter!(METRIC_HEDGES_COMPLETED).increment(1);
}

/// Increment force-close counter.
pub fn inc_force_closes() {
    counter!(METRIC_FORCE_CLOSES).increment(1);
}

/// Count a transition into `state`.
pub fn inc_state_transition(state: &'static str) {
    counter!(METRIC_STATE_TRANSITIONS, "state" => state).increment(1);
}

/// Publish the current imbalance.
pub fn set_imbalance(shares: f64) {
    gauge!(METRIC_IMBALANCE).set(shares);
}

/// Publish cumulative profit.
pub fn set_cumulative_profit(usd: f64) {
    gauge!(METRIC_CUMULATIVE_PROFIT).set(usd);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// Increment market rotations counter.
pub fn inc_market_rotations() {
    counter!(METRIC_MARKET_ROTATIONS).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        elapsed_ms(self.start)
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(elapsed_ms(self.start));
    }
}

/// Create a latency timer for a ledger refresh.
pub fn timer_ledger_refresh() -> LatencyTimer {
    LatencyTimer::new(METRIC_LEDGER_REFRESH_LATENCY)
}
