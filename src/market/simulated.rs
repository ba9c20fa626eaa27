//! In-process exchange used for dry runs and tests.
//!
//! Matches orders against the last quote set for each token, keeps holdings
//! per token and can be told to misbehave (drop order ids, reject
//! placements or cancels, leave immediate orders working, lag or fail
//! position reads).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::debug;

use super::types::{Leg, Market};
use crate::error::{FeedError, TradingError};
use crate::feed::{Quote, QuoteSource};
use crate::gateway::{
    unix_millis, CancelOutcome, OrderRequest, OrderState, OrderStatus, OrderStyle, OrderVenue,
    PlaceAck, Side, VenueOrder, VenueTrade,
};
use crate::ledger::{FillNotice, PositionSource, RemotePosition};

#[derive(Debug, Clone)]
struct SimOrder {
    leg: Leg,
    token_id: String,
    side: Side,
    price: Decimal,
    size: Decimal,
    filled: Decimal,
    notional: Decimal,
    status: OrderStatus,
    created_at: i64,
}

impl SimOrder {
    fn remaining(&self) -> Decimal {
        self.size - self.filled
    }

    fn avg_price(&self) -> Option<Decimal> {
        if self.filled > Decimal::ZERO {
            Some(self.notional / self.filled)
        } else {
            None
        }
    }

    fn state(&self, order_id: &str) -> OrderState {
        OrderState {
            order_id: order_id.to_string(),
            status: self.status,
            filled_size: self.filled,
            avg_fill_price: self.avg_price(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Holding {
    shares: Decimal,
    cost: Decimal,
}

impl Holding {
    fn apply(&mut self, side: Side, qty: Decimal, price: Decimal) {
        match side {
            Side::Buy => {
                self.shares += qty;
                self.cost += qty * price;
            }
            Side::Sell => {
                let removed = qty.min(self.shares);
                if self.shares > Decimal::ZERO {
                    self.cost -= self.cost * removed / self.shares;
                }
                self.shares -= removed;
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingFill {
    polls_left: u32,
    token_id: String,
    side: Side,
    qty: Decimal,
    price: Decimal,
}

#[derive(Debug, Default)]
struct SimState {
    quotes: HashMap<String, Quote>,
    orders: BTreeMap<String, SimOrder>,
    visible: HashMap<String, Holding>,
    pending: Vec<PendingFill>,
    remote_lag: u32,
    drop_ids: u32,
    fail_places: u32,
    fail_cancels: u32,
    slow_immediates: bool,
    trades: Vec<VenueTrade>,
    fail_positions: bool,
    fail_quotes: bool,
    next_id: u64,
    notices: Option<UnboundedSender<FillNotice>>,
}

impl SimState {
    fn record_fill(&mut self, order_id: &str, qty: Decimal, price: Decimal) {
        let Some(order) = self.orders.get_mut(order_id) else {
            return;
        };
        order.filled += qty;
        order.notional += qty * price;
        let (leg, side, token_id, cumulative) =
            (order.leg, order.side, order.token_id.clone(), order.filled);
        self.trades.push(VenueTrade {
            order_id: order_id.to_string(),
            token_id: token_id.clone(),
            side,
            price,
            size: qty,
            matched_at: unix_millis(),
        });

        if self.remote_lag == 0 {
            self.visible.entry(token_id).or_default().apply(side, qty, price);
        } else {
            self.pending.push(PendingFill {
                polls_left: self.remote_lag,
                token_id,
                side,
                qty,
                price,
            });
        }

        if let Some(tx) = &self.notices {
            let _ = tx.send(FillNotice {
                order_id: order_id.to_string(),
                leg,
                side,
                cumulative_filled: cumulative,
                price,
            });
        }
        debug!(order_id, %qty, %price, "Simulated fill");
    }

    /// Fill a live order against a quote; returns the quantity matched.
    fn cross(&mut self, order_id: &str, quote: &Quote) -> Decimal {
        let Some(order) = self.orders.get(order_id) else {
            return Decimal::ZERO;
        };
        let (touch, available) = match order.side {
            Side::Buy => match quote.best_ask {
                Some(ask) if order.price >= ask => (ask, quote.ask_size),
                _ => return Decimal::ZERO,
            },
            Side::Sell => match quote.best_bid {
                Some(bid) if order.price <= bid => (bid, quote.bid_size),
                _ => return Decimal::ZERO,
            },
        };
        let qty = order.remaining().min(available);
        if qty > Decimal::ZERO {
            self.record_fill(order_id, qty, touch);
        }
        qty
    }
}

/// Simulated venue, quote source and position store.
#[derive(Debug, Default)]
pub struct SimulatedExchange {
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    /// Empty exchange with no quotes or orders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Market wired to the simulator's conventional token ids.
    pub fn sample_market() -> Market {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        Market {
            slug: "sim-updown".to_string(),
            id: "sim-market".to_string(),
            up_token_id: "sim-up".to_string(),
            down_token_id: "sim-down".to_string(),
            tick_size: Market::DEFAULT_TICK,
            start_timestamp: now,
            end_timestamp: now + 86_400,
            question: Some("Simulated market".to_string()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish fills on a channel as they happen.
    pub fn with_fill_notices(self, tx: UnboundedSender<FillNotice>) -> Self {
        self.lock().notices = Some(tx);
        self
    }

    /// Set the quote for a token and match any resting orders against it.
    pub fn set_quote(&self, token_id: &str, quote: Quote) {
        let mut state = self.lock();
        state.quotes.insert(token_id.to_string(), quote);

        let live: Vec<String> = state
            .orders
            .iter()
            .filter(|(_, o)| o.token_id == token_id && o.status.is_open())
            .map(|(id, _)| id.clone())
            .collect();

        let mut book = quote;
        for id in live {
            let Some(order) = state.orders.get(&id) else {
                continue;
            };
            let (side, price) = (order.side, order.price);
            let qty = match side {
                Side::Buy if book.best_ask.is_some_and(|ask| price >= ask) => {
                    let qty = order.remaining().min(book.ask_size);
                    book.ask_size -= qty;
                    qty
                }
                Side::Sell if book.best_bid.is_some_and(|bid| price <= bid) => {
                    let qty = order.remaining().min(book.bid_size);
                    book.bid_size -= qty;
                    qty
                }
                _ => Decimal::ZERO,
            };
            if qty > Decimal::ZERO {
                // Resting orders trade at their own limit.
                state.record_fill(&id, qty, price);
                state.settle(&id);
            }
        }
    }

    /// Fill part of a live order at its limit price.
    pub fn fill_resting(&self, order_id: &str, qty: Decimal) {
        let mut state = self.lock();
        let Some(order) = state.orders.get(order_id) else {
            return;
        };
        if !order.status.is_open() {
            return;
        }
        let (qty, price) = (qty.min(order.remaining()), order.price);
        if qty > Decimal::ZERO {
            state.record_fill(order_id, qty, price);
            state.settle(order_id);
        }
    }

    /// Seed a remote holding directly.
    pub fn set_holding(&self, token_id: &str, shares: Decimal, avg_cost: Decimal) {
        self.lock().visible.insert(
            token_id.to_string(),
            Holding {
                shares,
                cost: shares * avg_cost,
            },
        );
    }

    /// Shares held, including fills the position endpoint has not shown yet.
    pub fn shares(&self, token_id: &str) -> Decimal {
        let state = self.lock();
        let mut holding = state.visible.get(token_id).copied().unwrap_or_default();
        for p in state.pending.iter().filter(|p| p.token_id == token_id) {
            holding.apply(p.side, p.qty, p.price);
        }
        holding.shares
    }

    /// Return placements without an order id for the next `n` orders.
    pub fn drop_next_order_ids(&self, n: u32) {
        self.lock().drop_ids = n;
    }

    /// Reject the next `n` placements.
    pub fn fail_next_places(&self, n: u32) {
        self.lock().fail_places = n;
    }

    /// Fail the next `n` cancels.
    pub fn fail_next_cancels(&self, n: u32) {
        self.lock().fail_cancels = n;
    }

    /// Leave the unfilled part of immediate orders working until cancelled.
    pub fn slow_immediates(&self, slow: bool) {
        self.lock().slow_immediates = slow;
    }

    /// Delay fills on the position endpoint by `polls` reads.
    pub fn set_remote_lag(&self, polls: u32) {
        self.lock().remote_lag = polls;
    }

    /// Make position reads fail.
    pub fn fail_positions(&self, fail: bool) {
        self.lock().fail_positions = fail;
    }

    /// Make quote pulls fail.
    pub fn fail_quotes(&self, fail: bool) {
        self.lock().fail_quotes = fail;
    }

    /// Number of orders still working.
    pub fn open_order_count(&self) -> usize {
        self.lock().orders.values().filter(|o| o.status.is_open()).count()
    }
}

impl SimState {
    fn settle(&mut self, order_id: &str) {
        if let Some(order) = self.orders.get_mut(order_id) {
            if order.remaining() <= Decimal::ZERO {
                order.status = OrderStatus::Filled;
            } else if order.filled > Decimal::ZERO && order.status == OrderStatus::Open {
                order.status = OrderStatus::PartiallyFilled;
            }
        }
    }
}

#[async_trait]
impl OrderVenue for SimulatedExchange {
    async fn place(&self, request: &OrderRequest) -> Result<PlaceAck, TradingError> {
        let mut state = self.lock();
        if state.fail_places > 0 {
            state.fail_places -= 1;
            return Err(TradingError::OrderRejected {
                reason: "simulated rejection".to_string(),
            });
        }
        request.validate().map_err(TradingError::InvalidParams)?;

        state.next_id += 1;
        let order_id = format!("sim-{:08}", state.next_id);
        state.orders.insert(
            order_id.clone(),
            SimOrder {
                leg: request.leg,
                token_id: request.token_id.clone(),
                side: request.side,
                price: request.price,
                size: request.size,
                filled: Decimal::ZERO,
                notional: Decimal::ZERO,
                status: OrderStatus::Open,
                created_at: unix_millis(),
            },
        );

        if let Some(quote) = state.quotes.get(&request.token_id).copied() {
            state.cross(&order_id, &quote);
        }
        state.settle(&order_id);

        if request.style == OrderStyle::Immediate && !state.slow_immediates {
            if let Some(order) = state.orders.get_mut(&order_id) {
                if order.status.is_open() {
                    order.status = OrderStatus::Cancelled;
                }
            }
        }

        let ack_state = match state.orders.get(&order_id) {
            Some(order) => order.state(&order_id),
            None => return Err(TradingError::UnknownOrder(order_id)),
        };

        let id = if state.drop_ids > 0 {
            state.drop_ids -= 1;
            None
        } else {
            Some(order_id)
        };

        Ok(PlaceAck {
            order_id: id,
            status: ack_state.status,
            filled_size: ack_state.filled_size,
            avg_fill_price: ack_state.avg_fill_price,
        })
    }

    async fn cancel(&self, order_id: &str) -> Result<CancelOutcome, TradingError> {
        let mut state = self.lock();
        if state.fail_cancels > 0 {
            state.fail_cancels -= 1;
            return Err(TradingError::CancelFailed {
                order_id: order_id.to_string(),
                reason: "simulated timeout".to_string(),
            });
        }
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| TradingError::UnknownOrder(order_id.to_string()))?;
        Ok(match order.status {
            OrderStatus::Open | OrderStatus::PartiallyFilled => {
                order.status = OrderStatus::Cancelled;
                CancelOutcome::Cancelled
            }
            OrderStatus::Filled => CancelOutcome::AlreadyFilled,
            OrderStatus::Cancelled => CancelOutcome::AlreadyCancelled,
        })
    }

    async fn status(&self, order_id: &str) -> Result<OrderState, TradingError> {
        let state = self.lock();
        state
            .orders
            .get(order_id)
            .map(|o| o.state(order_id))
            .ok_or_else(|| TradingError::UnknownOrder(order_id.to_string()))
    }

    async fn open_orders(&self, token_id: &str) -> Result<Vec<VenueOrder>, TradingError> {
        let state = self.lock();
        Ok(state
            .orders
            .iter()
            .filter(|(_, o)| o.token_id == token_id && o.status.is_open())
            .map(|(id, o)| VenueOrder {
                order_id: id.clone(),
                token_id: o.token_id.clone(),
                side: o.side,
                price: o.price,
                size: o.size,
                created_at: o.created_at,
            })
            .collect())
    }

    async fn recent_trades(&self, token_id: &str) -> Result<Vec<VenueTrade>, TradingError> {
        let state = self.lock();
        Ok(state
            .trades
            .iter()
            .filter(|t| t.token_id == token_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PositionSource for SimulatedExchange {
    async fn positions(&self) -> Result<Vec<RemotePosition>, TradingError> {
        let mut state = self.lock();
        if state.fail_positions {
            return Err(TradingError::PositionsFailed("simulated outage".to_string()));
        }

        let mut still_pending = Vec::new();
        for mut fill in std::mem::take(&mut state.pending) {
            fill.polls_left = fill.polls_left.saturating_sub(1);
            if fill.polls_left == 0 {
                state
                    .visible
                    .entry(fill.token_id.clone())
                    .or_default()
                    .apply(fill.side, fill.qty, fill.price);
            } else {
                still_pending.push(fill);
            }
        }
        state.pending = still_pending;

        Ok(state
            .visible
            .iter()
            .filter(|(_, h)| h.shares > Decimal::ZERO)
            .map(|(token_id, h)| RemotePosition {
                token_id: token_id.clone(),
                shares: h.shares,
                avg_cost: Some(h.cost / h.shares),
            })
            .collect())
    }
}

#[async_trait]
impl QuoteSource for SimulatedExchange {
    async fn fetch_quote(&self, token_id: &str) -> Result<Quote, FeedError> {
        let state = self.lock();
        if state.fail_quotes {
            return Err(FeedError::FetchFailed {
                token_id: token_id.to_string(),
                reason: "simulated outage".to_string(),
            });
        }
        let quote = state.quotes.get(token_id).copied().unwrap_or_else(Quote::empty);
        Ok(Quote {
            captured_at: Instant::now(),
            ..quote
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(token: &str, side: Side, price: Decimal, size: Decimal, style: OrderStyle) -> OrderRequest {
        OrderRequest {
            leg: Leg::Up,
            token_id: token.to_string(),
            side,
            price,
            size,
            style,
        }
    }

    #[tokio::test]
    async fn resting_buy_fills_when_ask_reaches_limit() {
        let sim = SimulatedExchange::new();
        sim.set_quote("t", Quote::two_sided(dec!(0.40), dec!(0.45), dec!(20)));
        let ack = sim
            .place(&request("t", Side::Buy, dec!(0.41), dec!(10), OrderStyle::Resting))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Open);

        sim.set_quote("t", Quote::two_sided(dec!(0.39), dec!(0.41), dec!(4)));
        let id = ack.order_id.unwrap();
        let state = sim.status(&id).await.unwrap();
        assert_eq!(state.status, OrderStatus::PartiallyFilled);
        assert_eq!(state.filled_size, dec!(4));
        assert_eq!(sim.shares("t"), dec!(4));
    }

    #[tokio::test]
    async fn remote_lag_delays_positions() {
        let sim = SimulatedExchange::new();
        sim.set_remote_lag(2);
        sim.set_quote("t", Quote::two_sided(dec!(0.40), dec!(0.45), dec!(20)));
        sim.place(&request("t", Side::Buy, dec!(0.45), dec!(10), OrderStyle::Immediate))
            .await
            .unwrap();

        assert!(sim.positions().await.unwrap().is_empty());
        let visible = sim.positions().await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].shares, dec!(10));
        assert_eq!(visible[0].avg_cost, Some(dec!(0.45)));
    }

    #[tokio::test]
    async fn fills_are_published() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sim = SimulatedExchange::new().with_fill_notices(tx);
        sim.set_quote("t", Quote::two_sided(dec!(0.40), dec!(0.45), dec!(20)));
        sim.place(&request("t", Side::Sell, dec!(0.40), dec!(5), OrderStyle::Immediate))
            .await
            .unwrap();

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.side, Side::Sell);
        assert_eq!(notice.cumulative_filled, dec!(5));
        assert_eq!(notice.price, dec!(0.40));
    }

    #[tokio::test]
    async fn trades_are_logged_per_token() {
        let sim = SimulatedExchange::new();
        sim.set_quote("t", Quote::two_sided(dec!(0.40), dec!(0.45), dec!(20)));
        sim.drop_next_order_ids(1);
        let ack = sim
            .place(&request("t", Side::Buy, dec!(0.46), dec!(10), OrderStyle::Immediate))
            .await
            .unwrap();
        assert_eq!(ack.order_id, None);
        assert_eq!(ack.filled_size, dec!(10));

        let trades = sim.recent_trades("t").await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(0.45));
        assert_eq!(trades[0].size, dec!(10));
        assert!(sim.recent_trades("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_immediate_keeps_remainder_working() {
        let sim = SimulatedExchange::new();
        sim.slow_immediates(true);
        sim.set_quote("t", Quote::two_sided(dec!(0.40), dec!(0.45), dec!(4)));
        let ack = sim
            .place(&request("t", Side::Buy, dec!(0.45), dec!(10), OrderStyle::Immediate))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::PartiallyFilled);
        assert_eq!(sim.open_order_count(), 1);

        sim.fail_next_cancels(1);
        let id = ack.order_id.unwrap();
        assert!(sim.cancel(&id).await.is_err());
        assert_eq!(sim.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_order_errors() {
        let sim = SimulatedExchange::new();
        assert!(matches!(
            sim.cancel("nope").await,
            Err(TradingError::UnknownOrder(_))
        ));
    }
}
