//! Order gateway: resting and immediate placement, status polling, cancels.

use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use rust_decimal::Decimal;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, instrument, warn};

use super::order::{
    unix_millis, CancelOutcome, ImmediateFill, OrderHandle, OrderRequest, OrderState, OrderStatus,
    OrderStyle, PlaceAck, Side, VenueOrder, VenueTrade,
};
use super::venue::OrderVenue;
use crate::config::Config;
use crate::error::TradingError;
use crate::market::{Leg, Market};
use crate::metrics;

/// Gateway timing settings.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// How long an immediate order may take to reach a terminal status.
    pub order_timeout: Duration,
    /// Poll interval for order status.
    pub poll_interval: Duration,
    /// Window used to match an unacknowledged placement to an open order.
    pub correlation_window: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            order_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(250),
            correlation_window: Duration::from_secs(10),
        }
    }
}

impl GatewaySettings {
    /// Create from config values.
    pub fn from_config(config: &Config) -> Self {
        Self {
            order_timeout: Duration::from_millis(config.order_timeout_ms),
            poll_interval: Duration::from_millis(config.order_poll_interval_ms),
            correlation_window: Duration::from_millis(config.correlation_window_ms),
        }
    }
}

/// Places, polls and cancels individual orders against a venue.
///
/// Reprices are always cancel-then-replace. A placement whose outcome is
/// unknown (transport failure, missing order id) is matched against the
/// venue's open orders by side, price, size and time before being treated as
/// not placed. Immediate orders are also looked up in recent trades, since
/// they rarely stay open long enough to be listed.
#[derive(Clone)]
pub struct OrderGateway {
    venue: Arc<dyn OrderVenue>,
    settings: GatewaySettings,
}

impl OrderGateway {
    /// Create a gateway over a venue.
    pub fn new(venue: Arc<dyn OrderVenue>, settings: GatewaySettings) -> Self {
        Self { venue, settings }
    }

    fn request(
        market: &Market,
        leg: Leg,
        side: Side,
        price: Decimal,
        size: Decimal,
        style: OrderStyle,
    ) -> OrderRequest {
        OrderRequest {
            leg,
            token_id: market.token_id(leg).to_string(),
            side,
            price,
            size,
            style,
        }
    }

    /// Place a resting order; `None` means it is not on the book.
    #[instrument(skip(self, market), fields(market = %market.slug))]
    pub async fn place_resting(
        &self,
        market: &Market,
        leg: Leg,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Option<OrderHandle> {
        let request = Self::request(market, leg, side, price, size, OrderStyle::Resting);
        if let Err(reason) = request.validate() {
            warn!(reason = %reason, "Refusing invalid resting order");
            return None;
        }

        let submitted_at = unix_millis();
        let order_id = match self.submit(&request).await {
            Ok(PlaceAck {
                order_id: Some(id), ..
            }) => Some(id),
            Ok(PlaceAck { order_id: None, .. }) => {
                let e = TradingError::MissingOrderId { leg, price };
                self.correlate(&request, submitted_at, &e).await
            }
            Err(e) if e.is_ambiguous() => self.correlate(&request, submitted_at, &e).await,
            Err(e) => {
                warn!(error = %e, "Resting order rejected");
                None
            }
        }?;

        info!(order_id = %order_id, %leg, %side, %price, %size, "Resting order placed");
        Some(OrderHandle {
            order_id,
            leg,
            side,
            price,
            size,
            placed_at: Instant::now(),
        })
    }

    /// Place an immediate order and wait for its terminal fill.
    ///
    /// Never leaves a remainder on the book: a non-terminal order is
    /// cancelled once the timeout passes.
    #[instrument(skip(self, market), fields(market = %market.slug))]
    pub async fn place_immediate(
        &self,
        market: &Market,
        leg: Leg,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> ImmediateFill {
        let request = Self::request(market, leg, side, price, size, OrderStyle::Immediate);
        if let Err(reason) = request.validate() {
            warn!(reason = %reason, "Refusing invalid immediate order");
            return ImmediateFill::none();
        }

        let submitted_at = unix_millis();
        let (order_id, state) = match self.submit(&request).await {
            Ok(PlaceAck {
                order_id: Some(order_id),
                status,
                filled_size,
                avg_fill_price,
            }) => {
                let state = if status.is_terminal() {
                    OrderState {
                        order_id: order_id.clone(),
                        status,
                        filled_size,
                        avg_fill_price,
                    }
                } else {
                    self.wait_for_terminal(&order_id, filled_size, avg_fill_price)
                        .await
                };
                (order_id, state)
            }
            Ok(ack) => {
                let e = TradingError::MissingOrderId { leg, price };
                match self.recover_immediate(&request, submitted_at, Some(&ack), &e).await {
                    Some(found) => found,
                    None => return ImmediateFill::none(),
                }
            }
            Err(e) if e.is_ambiguous() => {
                match self.recover_immediate(&request, submitted_at, None, &e).await {
                    Some(found) => found,
                    None => return ImmediateFill::none(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Immediate order failed");
                return ImmediateFill::none();
            }
        };

        if state.filled_size > Decimal::ZERO {
            metrics::inc_orders_filled(leg);
        }
        info!(order_id = %order_id, %leg, %side, %price, filled = %state.filled_size, "Immediate order done");

        ImmediateFill {
            order_id: Some(order_id),
            filled: state.filled_size,
            avg_price: state.avg_fill_price,
        }
    }

    /// Find what an unacknowledged immediate order did.
    ///
    /// Tries the open orders first, then the trade history. When neither
    /// knows it, a fill reported on the ack is kept under a local id.
    async fn recover_immediate(
        &self,
        request: &OrderRequest,
        submitted_at: i64,
        ack: Option<&PlaceAck>,
        cause: &TradingError,
    ) -> Option<(String, OrderState)> {
        let (ack_filled, ack_price) = ack
            .map(|a| (a.filled_size, a.avg_fill_price))
            .unwrap_or((Decimal::ZERO, None));

        if let Some(order_id) = self.correlate(request, submitted_at, cause).await {
            let state = self.wait_for_terminal(&order_id, ack_filled, ack_price).await;
            return Some((order_id, state));
        }

        match self.venue.recent_trades(&request.token_id).await {
            Ok(trades) => {
                let window = self.settings.correlation_window.as_millis() as i64;
                if let Some(state) = find_trade_fill(&trades, request, submitted_at, window) {
                    info!(order_id = %state.order_id, filled = %state.filled_size, cause = %cause, "Recovered immediate order from trades");
                    return Some((state.order_id.clone(), state));
                }
            }
            Err(e) => warn!(error = %e, cause = %cause, "Could not read recent trades"),
        }

        if ack_filled > Decimal::ZERO {
            let order_id = format!(
                "unacked-{}-{}-{}-{}",
                request.leg, request.side, request.price, submitted_at
            );
            warn!(order_id = %order_id, filled = %ack_filled, cause = %cause, "Keeping fill reported without an order id");
            let state = OrderState {
                order_id: order_id.clone(),
                status: OrderStatus::Cancelled,
                filled_size: ack_filled,
                avg_fill_price: ack_price.or(Some(request.price)),
            };
            return Some((order_id, state));
        }

        warn!(cause = %cause, "Immediate order not found; assuming nothing filled");
        None
    }

    /// Current state of a resting order.
    pub async fn status(&self, handle: &OrderHandle) -> Result<OrderState, TradingError> {
        self.venue.status(&handle.order_id).await
    }

    /// Cancel an order; already-filled and already-cancelled are not errors.
    #[instrument(skip(self, handle), fields(order_id = %handle.order_id))]
    pub async fn cancel(&self, handle: &OrderHandle) -> Result<CancelOutcome, TradingError> {
        self.cancel_id(&handle.order_id).await
    }

    async fn cancel_id(&self, order_id: &str) -> Result<CancelOutcome, TradingError> {
        match self.venue.cancel(order_id).await {
            Ok(outcome) => {
                if outcome == CancelOutcome::Cancelled {
                    metrics::inc_orders_cancelled();
                }
                debug!(order_id, outcome = %outcome, "Cancel acknowledged");
                Ok(outcome)
            }
            Err(e) => {
                warn!(order_id, error = %e, "Cancel failed");
                Err(e)
            }
        }
    }

    async fn submit(&self, request: &OrderRequest) -> Result<PlaceAck, TradingError> {
        let start = StdInstant::now();
        let result = self.venue.place(request).await;
        metrics::record_order_latency(start, request.style);
        match &result {
            Ok(_) => metrics::inc_orders_placed(request.leg, request.style),
            Err(_) => metrics::inc_orders_failed(),
        }
        result
    }

    /// Look for an open order matching an unacknowledged placement.
    async fn correlate(
        &self,
        request: &OrderRequest,
        submitted_at: i64,
        cause: &TradingError,
    ) -> Option<String> {
        let open = match self.venue.open_orders(&request.token_id).await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, cause = %cause, "Could not list open orders; assuming not placed");
                return None;
            }
        };

        let window = self.settings.correlation_window.as_millis() as i64;
        let found = find_match(&open, request, submitted_at, window);
        match &found {
            Some(id) => info!(order_id = %id, cause = %cause, "Recovered unacknowledged order"),
            None => warn!(cause = %cause, "No matching open order; assuming not placed"),
        }
        found
    }

    async fn wait_for_terminal(
        &self,
        order_id: &str,
        mut filled: Decimal,
        mut avg_price: Option<Decimal>,
    ) -> OrderState {
        let deadline = Instant::now() + self.settings.order_timeout;

        loop {
            match self.venue.status(order_id).await {
                Ok(state) if state.status.is_terminal() => return state,
                Ok(state) => {
                    filled = filled.max(state.filled_size);
                    avg_price = state.avg_fill_price.or(avg_price);
                }
                Err(e) => warn!(order_id, error = %e, "Error getting order status"),
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.settings.poll_interval).await;
        }

        warn!(order_id, "Immediate order not terminal before timeout, cancelling remainder");
        self.cancel_remainder(order_id, filled, avg_price).await
    }

    /// Cancel until the venue reports the order terminal or the timeout
    /// passes again.
    async fn cancel_remainder(
        &self,
        order_id: &str,
        filled: Decimal,
        avg_price: Option<Decimal>,
    ) -> OrderState {
        let deadline = Instant::now() + self.settings.order_timeout;
        let mut last = OrderState {
            order_id: order_id.to_string(),
            status: OrderStatus::Open,
            filled_size: filled,
            avg_fill_price: avg_price,
        };

        loop {
            if let Err(e) = self.cancel_id(order_id).await {
                warn!(order_id, error = %e, "Remainder cancel failed, retrying");
            }
            match self.venue.status(order_id).await {
                Ok(state) if state.status.is_terminal() => return state,
                Ok(state) => last = state,
                Err(TradingError::UnknownOrder(_)) => {
                    last.status = OrderStatus::Cancelled;
                    return last;
                }
                Err(e) => warn!(order_id, error = %e, "Error getting order status"),
            }

            if Instant::now() >= deadline {
                error!(order_id, filled = %last.filled_size, "Immediate order remainder may still be working");
                return last;
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

/// Most recent open order matching side, price and size within the window.
fn find_match(
    open: &[VenueOrder],
    request: &OrderRequest,
    submitted_at: i64,
    window_ms: i64,
) -> Option<String> {
    open.iter()
        .filter(|o| {
            o.side == request.side
                && o.price == request.price
                && o.size == request.size
                && (o.created_at - submitted_at).abs() <= window_ms
        })
        .max_by_key(|o| o.created_at)
        .map(|o| o.order_id.clone())
}

/// Total fill of the most recent order whose trades fit the request.
///
/// A trade fits when it is on the same side, no worse than the limit and
/// within the window of the submission.
fn find_trade_fill(
    trades: &[VenueTrade],
    request: &OrderRequest,
    submitted_at: i64,
    window_ms: i64,
) -> Option<OrderState> {
    let fits = |t: &&VenueTrade| {
        t.side == request.side
            && match request.side {
                Side::Buy => t.price <= request.price,
                Side::Sell => t.price >= request.price,
            }
            && (t.matched_at - submitted_at).abs() <= window_ms
    };
    let order_id = trades
        .iter()
        .filter(fits)
        .max_by_key(|t| t.matched_at)?
        .order_id
        .clone();

    let (filled, notional) = trades
        .iter()
        .filter(|t| t.order_id == order_id)
        .fold((Decimal::ZERO, Decimal::ZERO), |(size, cash), t| {
            (size + t.size, cash + t.size * t.price)
        });
    if filled <= Decimal::ZERO {
        return None;
    }
    let avg_fill_price = Some(notional / filled);
    let filled = filled.min(request.size);
    Some(OrderState {
        order_id,
        status: if filled >= request.size {
            OrderStatus::Filled
        } else {
            OrderStatus::Cancelled
        },
        filled_size: filled,
        avg_fill_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Quote;
    use crate::market::SimulatedExchange;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn venue_order(id: &str, price: Decimal, created_at: i64) -> VenueOrder {
        VenueOrder {
            order_id: id.to_string(),
            token_id: "up".to_string(),
            side: Side::Buy,
            price,
            size: dec!(10),
            created_at,
        }
    }

    fn request() -> OrderRequest {
        OrderRequest {
            leg: Leg::Up,
            token_id: "up".to_string(),
            side: Side::Buy,
            price: dec!(0.41),
            size: dec!(10),
            style: OrderStyle::Resting,
        }
    }

    #[test]
    fn find_match_prefers_latest_within_window() {
        let open = vec![
            venue_order("old", dec!(0.41), 900_000),
            venue_order("a", dec!(0.41), 1_000_000),
            venue_order("b", dec!(0.41), 1_003_000),
            venue_order("other-price", dec!(0.42), 1_004_000),
        ];
        assert_eq!(find_match(&open, &request(), 1_001_000, 10_000), Some("b".to_string()));
        assert_eq!(find_match(&open, &request(), 2_000_000, 10_000), None);
    }

    #[test]
    fn find_match_honours_sub_second_window() {
        let open = vec![venue_order("near", dec!(0.41), 1_000_400)];
        assert_eq!(find_match(&open, &request(), 1_000_000, 500), Some("near".to_string()));
        assert_eq!(find_match(&open, &request(), 1_000_000, 300), None);
    }

    fn trade(id: &str, price: Decimal, size: Decimal, matched_at: i64) -> VenueTrade {
        VenueTrade {
            order_id: id.to_string(),
            token_id: "up".to_string(),
            side: Side::Buy,
            price,
            size,
            matched_at,
        }
    }

    #[test]
    fn trade_fill_sums_latest_order_within_limit() {
        let trades = vec![
            trade("earlier", dec!(0.40), dec!(10), 995_000),
            trade("mine", dec!(0.40), dec!(4), 1_000_100),
            trade("mine", dec!(0.41), dec!(6), 1_000_200),
            trade("too-dear", dec!(0.43), dec!(10), 1_000_300),
        ];
        let state = find_trade_fill(&trades, &request(), 1_000_000, 10_000).unwrap();
        assert_eq!(state.order_id, "mine");
        assert_eq!(state.filled_size, dec!(10));
        assert_eq!(state.status, OrderStatus::Filled);
        assert_eq!(state.avg_fill_price, Some(dec!(0.406)));

        assert_eq!(find_trade_fill(&trades, &request(), 1_100_000, 10_000), None);
    }

    fn setup() -> (Arc<SimulatedExchange>, OrderGateway, Market) {
        let sim = Arc::new(SimulatedExchange::new());
        let market = SimulatedExchange::sample_market();
        let gateway = OrderGateway::new(sim.clone(), GatewaySettings::default());
        (sim, gateway, market)
    }

    #[tokio::test]
    async fn resting_order_is_placed() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.up_token_id, Quote::two_sided(dec!(0.40), dec!(0.45), dec!(50)));

        let handle = gateway
            .place_resting(&market, Leg::Up, Side::Buy, dec!(0.41), dec!(10))
            .await
            .unwrap();
        assert_eq!(handle.price, dec!(0.41));
        let state = gateway.status(&handle).await.unwrap();
        assert_eq!(state.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn missing_order_id_is_recovered_from_open_orders() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.up_token_id, Quote::two_sided(dec!(0.40), dec!(0.45), dec!(50)));
        sim.drop_next_order_ids(1);

        let handle = gateway
            .place_resting(&market, Leg::Up, Side::Buy, dec!(0.41), dec!(10))
            .await;
        assert!(handle.is_some());
        assert_eq!(sim.open_order_count(), 1);
    }

    #[tokio::test]
    async fn rejected_placement_is_not_placed() {
        let (sim, gateway, market) = setup();
        sim.fail_next_places(1);

        let handle = gateway
            .place_resting(&market, Leg::Up, Side::Buy, dec!(0.41), dec!(10))
            .await;
        assert!(handle.is_none());
        assert_eq!(sim.open_order_count(), 0);
    }

    #[tokio::test]
    async fn immediate_order_fills_available_size_only() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.down_token_id, Quote::two_sided(dec!(0.48), dec!(0.50), dec!(6)));

        let fill = gateway
            .place_immediate(&market, Leg::Down, Side::Buy, dec!(0.50), dec!(10))
            .await;
        assert_eq!(fill.filled, dec!(6));
        assert_eq!(fill.avg_price, Some(dec!(0.50)));
        assert_eq!(sim.open_order_count(), 0);
    }

    #[tokio::test]
    async fn immediate_fill_without_id_is_recovered_from_trades() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.down_token_id, Quote::two_sided(dec!(0.48), dec!(0.50), dec!(6)));
        sim.drop_next_order_ids(1);

        let fill = gateway
            .place_immediate(&market, Leg::Down, Side::Buy, dec!(0.50), dec!(10))
            .await;
        assert_eq!(fill.filled, dec!(6));
        assert_eq!(fill.avg_price, Some(dec!(0.50)));
        let order_id = fill.order_id.unwrap();
        assert!(order_id.starts_with("sim-"));
        assert_eq!(sim.status(&order_id).await.unwrap().filled_size, dec!(6));
    }

    /// Venue that fills immediately but never returns an id or history.
    struct SilentVenue;

    #[async_trait]
    impl OrderVenue for SilentVenue {
        async fn place(&self, request: &OrderRequest) -> Result<PlaceAck, TradingError> {
            Ok(PlaceAck {
                order_id: None,
                status: OrderStatus::Filled,
                filled_size: request.size,
                avg_fill_price: Some(request.price),
            })
        }

        async fn cancel(&self, order_id: &str) -> Result<CancelOutcome, TradingError> {
            Err(TradingError::UnknownOrder(order_id.to_string()))
        }

        async fn status(&self, order_id: &str) -> Result<OrderState, TradingError> {
            Err(TradingError::UnknownOrder(order_id.to_string()))
        }

        async fn open_orders(&self, _token_id: &str) -> Result<Vec<VenueOrder>, TradingError> {
            Ok(Vec::new())
        }

        async fn recent_trades(&self, _token_id: &str) -> Result<Vec<VenueTrade>, TradingError> {
            Err(TradingError::Transport("history unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn acked_fill_without_id_is_kept() {
        let gateway = OrderGateway::new(Arc::new(SilentVenue), GatewaySettings::default());
        let market = SimulatedExchange::sample_market();

        let fill = gateway
            .place_immediate(&market, Leg::Down, Side::Buy, dec!(0.50), dec!(10))
            .await;
        assert_eq!(fill.filled, dec!(10));
        assert_eq!(fill.avg_price, Some(dec!(0.50)));
        assert!(fill.order_id.unwrap().starts_with("unacked-"));
    }

    #[tokio::test]
    async fn stuck_remainder_is_cancelled_despite_failures() {
        let sim = Arc::new(SimulatedExchange::new());
        let market = SimulatedExchange::sample_market();
        let settings = GatewaySettings {
            order_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            correlation_window: Duration::from_secs(10),
        };
        let gateway = OrderGateway::new(sim.clone(), settings);
        sim.slow_immediates(true);
        sim.fail_next_cancels(2);
        sim.set_quote(&market.down_token_id, Quote::two_sided(dec!(0.48), dec!(0.50), dec!(4)));

        let fill = gateway
            .place_immediate(&market, Leg::Down, Side::Buy, dec!(0.50), dec!(10))
            .await;
        assert_eq!(fill.filled, dec!(4));
        assert_eq!(sim.open_order_count(), 0);
    }

    #[tokio::test]
    async fn immediate_order_below_ask_fills_nothing() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.down_token_id, Quote::two_sided(dec!(0.48), dec!(0.50), dec!(6)));

        let fill = gateway
            .place_immediate(&market, Leg::Down, Side::Buy, dec!(0.49), dec!(10))
            .await;
        assert_eq!(fill.filled, Decimal::ZERO);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.up_token_id, Quote::two_sided(dec!(0.40), dec!(0.45), dec!(50)));
        let handle = gateway
            .place_resting(&market, Leg::Up, Side::Buy, dec!(0.41), dec!(10))
            .await
            .unwrap();

        assert_eq!(gateway.cancel(&handle).await.unwrap(), CancelOutcome::Cancelled);
        assert_eq!(
            gateway.cancel(&handle).await.unwrap(),
            CancelOutcome::AlreadyCancelled
        );
    }

    #[tokio::test]
    async fn cancel_after_fill_reports_already_filled() {
        let (sim, gateway, market) = setup();
        sim.set_quote(&market.up_token_id, Quote::two_sided(dec!(0.40), dec!(0.45), dec!(50)));
        let handle = gateway
            .place_resting(&market, Leg::Up, Side::Buy, dec!(0.41), dec!(10))
            .await
            .unwrap();
        sim.fill_resting(&handle.order_id, dec!(10));

        assert_eq!(gateway.cancel(&handle).await.unwrap(), CancelOutcome::AlreadyFilled);
    }
}
