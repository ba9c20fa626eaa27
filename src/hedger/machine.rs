//! Hedging state machine: one step per tick, driven by the risk phase.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::pricing::{self, EntrySkip};
use super::session::MarketSession;
use super::state::{ForceClose, HedgeState, RestingOrder};
use crate::config::StrategyParams;
use crate::feed::{QuoteFeed, QuoteView};
use crate::gateway::{CancelOutcome, ImmediateFill, OrderGateway, OrderHandle, OrderState, OrderStatus, Side};
use crate::ledger::{FillNotice, PositionSource};
use crate::market::{Leg, LegPair};
use crate::metrics;
use crate::risk::{RiskGovernor, RiskPhase};

/// Outcome of trying to hedge an exposed leg.
enum HedgeAttempt {
    /// Imbalance is gone.
    Complete,
    /// Remainder is resting on the opposite leg.
    Resting(RestingOrder, Decimal),
    /// No profitable hedge right now.
    Unavailable,
}

/// Drives a [`MarketSession`] through its states.
///
/// The machine itself is stateless between ticks; everything per-market lives
/// in the session so several markets can share one machine.
pub struct HedgeMachine {
    gateway: OrderGateway,
    feed: Arc<QuoteFeed>,
    positions: Arc<dyn PositionSource>,
    governor: RiskGovernor,
    params: StrategyParams,
}

impl HedgeMachine {
    /// Create a machine.
    pub fn new(
        gateway: OrderGateway,
        feed: Arc<QuoteFeed>,
        positions: Arc<dyn PositionSource>,
        governor: RiskGovernor,
        params: StrategyParams,
    ) -> Self {
        Self {
            gateway,
            feed,
            positions,
            governor,
            params,
        }
    }

    /// Strategy parameters in use.
    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    /// Refresh positions, evaluate risk and run one step. Returns the delay
    /// before the next tick.
    #[instrument(skip_all, fields(market = %session.market.slug))]
    pub async fn tick(
        &self,
        session: &mut MarketSession,
        now: Instant,
        time_to_expiry: Duration,
    ) -> Duration {
        session.ledger.refresh(self.positions.as_ref()).await;

        let imbalance = session.ledger.imbalance_shares();
        let phase = self.governor.evaluate(imbalance, time_to_expiry);
        if session.last_phase != Some(phase) {
            info!(%phase, %imbalance, secs_left = time_to_expiry.as_secs(), "Risk phase");
            session.last_phase = Some(phase);
        }

        let before = session.state.kind();
        self.step(session, phase, now).await;
        let after = session.state.kind();
        if before != after {
            info!(from = %before, to = %after, "State transition");
            metrics::inc_state_transition(after.into());
        }

        self.tick_interval(&session.state)
    }

    /// Delay before the next tick for a state.
    pub fn tick_interval(&self, state: &HedgeState) -> Duration {
        let cadence = &self.params.cadence;
        match state {
            HedgeState::Scanning | HedgeState::Paused { force_close: None } => cadence.scan,
            HedgeState::FirstLegBidding { .. } => cadence.chase,
            HedgeState::WaitingForHedge { .. } | HedgeState::HedgeBidding { .. } => cadence.hedge,
            HedgeState::ClosingPosition { .. } | HedgeState::Paused { force_close: Some(_) } => {
                cadence.force_close
            }
        }
    }

    /// Execute one step for the given phase.
    pub async fn step(&self, session: &mut MarketSession, phase: RiskPhase, now: Instant) {
        match phase {
            RiskPhase::ForceClose => self.force_close(session).await,
            // A started unwind runs to its snapshot even if the book evens out.
            RiskPhase::PauseNoImbalance
                if matches!(session.state, HedgeState::Paused { force_close: Some(_) }) =>
            {
                self.force_close(session).await
            }
            RiskPhase::PauseNoImbalance => self.pause(session).await,
            RiskPhase::HedgeOnly => {
                match &session.state {
                    HedgeState::FirstLegBidding { order } => {
                        let handle = order.handle.clone();
                        info!(order_id = %handle.order_id, "Hedge-only: withdrawing entry");
                        self.retire(session, &handle).await;
                        session.state = HedgeState::Scanning;
                    }
                    HedgeState::Paused { force_close: None } => {
                        session.state = HedgeState::Scanning;
                    }
                    _ => {}
                }
                self.advance(session, false, now).await;
            }
            RiskPhase::AllowNewExposure => {
                if matches!(session.state, HedgeState::Paused { .. }) {
                    session.state = HedgeState::Scanning;
                }
                self.advance(session, true, now).await;
            }
        }
    }

    /// Cancel every order the session owns and return to scanning.
    pub async fn cancel_all(&self, session: &mut MarketSession) {
        let handles: Vec<OrderHandle> = session.state.open_orders().into_iter().cloned().collect();
        for handle in &handles {
            self.retire(session, handle).await;
        }
        session.state = HedgeState::Scanning;
    }

    async fn advance(&self, session: &mut MarketSession, allow_entry: bool, now: Instant) {
        let state = std::mem::take(&mut session.state);
        session.state = match state {
            HedgeState::Scanning => self.scan(session, allow_entry, now).await,
            HedgeState::FirstLegBidding { order } => self.first_leg(session, order, now).await,
            HedgeState::WaitingForHedge {
                leg,
                fill_price,
                exposed_since,
            } => self.waiting(session, leg, fill_price, exposed_since, now).await,
            HedgeState::HedgeBidding {
                held_leg,
                held_avg,
                order,
                exposed_since,
            } => {
                self.hedge_bidding(session, held_leg, held_avg, order, exposed_since, now)
                    .await
            }
            HedgeState::ClosingPosition {
                leg,
                target,
                resting,
            } => self.closing(session, leg, target, resting).await,
            paused @ HedgeState::Paused { .. } => paused,
        };
    }

    // ---- Quotes -------------------------------------------------------

    async fn quote(&self, session: &MarketSession, leg: Leg) -> Option<QuoteView> {
        self.feed.fresh_quote(session.market.token_id(leg)).await
    }

    // ---- Fill accounting ----------------------------------------------

    /// Feed an order's cumulative fill to the ledger; returns the new shares.
    fn account(&self, session: &mut MarketSession, handle: &OrderHandle, state: &OrderState) -> Decimal {
        session.ledger.observe_fill(&FillNotice {
            order_id: handle.order_id.clone(),
            leg: handle.leg,
            side: handle.side,
            cumulative_filled: state.filled_size,
            price: state.avg_fill_price.unwrap_or(handle.price),
        })
    }

    fn account_immediate(
        &self,
        session: &mut MarketSession,
        leg: Leg,
        side: Side,
        fill: &ImmediateFill,
        limit: Decimal,
    ) -> Decimal {
        let Some(order_id) = &fill.order_id else {
            return Decimal::ZERO;
        };
        session.ledger.observe_fill(&FillNotice {
            order_id: order_id.clone(),
            leg,
            side,
            cumulative_filled: fill.filled,
            price: fill.avg_price.unwrap_or(limit),
        })
    }

    /// Poll a resting order and account any new fill.
    async fn poll(&self, session: &mut MarketSession, handle: &OrderHandle) -> Option<(OrderState, Decimal)> {
        match self.gateway.status(handle).await {
            Ok(state) => {
                let delta = self.account(session, handle, &state);
                Some((state, delta))
            }
            Err(e) => {
                warn!(order_id = %handle.order_id, error = %e, "Status poll failed");
                None
            }
        }
    }

    /// Cancel an order and account its final fill.
    async fn retire(
        &self,
        session: &mut MarketSession,
        handle: &OrderHandle,
    ) -> (Option<OrderState>, Decimal) {
        if let Err(e) = self.gateway.cancel(handle).await {
            warn!(order_id = %handle.order_id, error = %e, "Cancel failed, will retry");
        }
        match self.poll(session, handle).await {
            Some((state, delta)) => (Some(state), delta),
            None => (None, Decimal::ZERO),
        }
    }

    /// Excess shares on `leg`, if that leg is the heavy one.
    fn exposed(&self, session: &MarketSession, leg: Leg) -> Option<Decimal> {
        session
            .ledger
            .imbalance()
            .filter(|e| e.leg == leg)
            .map(|e| e.shares)
    }

    // ---- Scanning -----------------------------------------------------

    async fn scan(&self, session: &mut MarketSession, allow_entry: bool, now: Instant) -> HedgeState {
        if let Some(exposure) = session.ledger.imbalance() {
            let held_avg = self.held_avg(session, exposure.leg, None);
            return match self.attempt_hedge(session, exposure.leg, held_avg, now, true).await {
                HedgeAttempt::Complete => HedgeState::Scanning,
                HedgeAttempt::Resting(order, held_avg) => HedgeState::HedgeBidding {
                    held_leg: exposure.leg,
                    held_avg,
                    order,
                    exposed_since: now,
                },
                HedgeAttempt::Unavailable => {
                    debug!(leg = %exposure.leg, shares = %exposure.shares, "No profitable hedge yet");
                    HedgeState::Scanning
                }
            };
        }

        if !allow_entry {
            return HedgeState::Scanning;
        }

        let (Some(up), Some(down)) = (self.quote(session, Leg::Up).await, self.quote(session, Leg::Down).await)
        else {
            debug!("No quotes yet");
            return HedgeState::Scanning;
        };

        let plan = match pricing::plan_entry(&self.params, session.market.tick_size, LegPair::new(&up, &down)) {
            Ok(plan) => plan,
            Err(skip) => {
                if skip != EntrySkip::NoLiquidity {
                    debug!(reason = %skip, "Entry skipped");
                }
                return HedgeState::Scanning;
            }
        };

        match self
            .gateway
            .place_resting(&session.market, plan.leg, Side::Buy, plan.price, self.params.order_size)
            .await
        {
            Some(handle) => {
                session.stats.entries += 1;
                info!(leg = %plan.leg, price = %plan.price, size = %self.params.order_size, "Entry bid placed");
                HedgeState::FirstLegBidding {
                    order: RestingOrder::new(handle, now, now + self.params.first_leg_timeout),
                }
            }
            None => HedgeState::Scanning,
        }
    }

    fn held_avg(&self, session: &MarketSession, leg: Leg, fallback: Option<Decimal>) -> Decimal {
        session
            .ledger
            .avg_cost(leg)
            .or(fallback)
            .unwrap_or(self.params.max_entry_price)
    }

    /// Immediate hedge when profitable, resting remainder when `rest` and
    /// profitable.
    async fn attempt_hedge(
        &self,
        session: &mut MarketSession,
        held_leg: Leg,
        held_avg: Decimal,
        now: Instant,
        rest: bool,
    ) -> HedgeAttempt {
        let hedge_leg = held_leg.opposite();
        let Some(opposite) = self.quote(session, hedge_leg).await else {
            return HedgeAttempt::Unavailable;
        };

        let Some(shares) = self.exposed(session, held_leg) else {
            self.pair_completed(session);
            return HedgeAttempt::Complete;
        };

        if let Some(ask) = pricing::immediate_hedge_price(&self.params, held_avg, &opposite) {
            let fill = self
                .gateway
                .place_immediate(&session.market, hedge_leg, Side::Buy, ask, shares)
                .await;
            let delta = self.account_immediate(session, hedge_leg, Side::Buy, &fill, ask);
            session.record_hedge(delta, held_avg, fill.avg_price.unwrap_or(ask));
            if delta > Decimal::ZERO {
                info!(leg = %hedge_leg, price = %ask, filled = %delta, "Immediate hedge");
            }
        }

        let Some(remaining) = self.exposed(session, held_leg) else {
            self.pair_completed(session);
            return HedgeAttempt::Complete;
        };

        if !rest {
            return HedgeAttempt::Unavailable;
        }

        let held_avg = self.held_avg(session, held_leg, Some(held_avg));
        let Some(price) =
            pricing::resting_hedge_price(&self.params, session.market.tick_size, held_avg, &opposite)
        else {
            return HedgeAttempt::Unavailable;
        };

        match self
            .gateway
            .place_resting(&session.market, hedge_leg, Side::Buy, price, remaining)
            .await
        {
            Some(handle) => {
                info!(leg = %hedge_leg, %price, size = %remaining, "Hedge bid placed");
                HedgeAttempt::Resting(
                    RestingOrder::new(handle, now, now + self.params.hedge_timeout),
                    held_avg,
                )
            }
            None => HedgeAttempt::Unavailable,
        }
    }

    fn pair_completed(&self, session: &mut MarketSession) {
        session.stats.pairs_completed += 1;
        metrics::inc_hedges_completed();
        info!(
            pairs = session.stats.pairs_completed,
            realized = %session.stats.realized_profit,
            "Pair hedged"
        );
    }

    // ---- First leg ----------------------------------------------------

    async fn first_leg(&self, session: &mut MarketSession, order: RestingOrder, now: Instant) -> HedgeState {
        let handle = order.handle.clone();
        let leg = handle.leg;
        let Some((state, _)) = self.poll(session, &handle).await else {
            return HedgeState::FirstLegBidding { order };
        };

        match state.status {
            OrderStatus::Filled => {
                let fill_price = state.avg_fill_price.unwrap_or(handle.price);
                info!(%leg, price = %fill_price, size = %state.filled_size, "First leg filled");
                self.after_entry(session, leg, fill_price, now).await
            }
            OrderStatus::Cancelled => {
                info!(order_id = %handle.order_id, "Entry cancelled externally");
                self.after_entry_stopped(session, leg, &state, &handle, now)
            }
            OrderStatus::Open | OrderStatus::PartiallyFilled => {
                if now >= order.deadline {
                    info!(order_id = %handle.order_id, "Entry timed out");
                    let (last, _) = self.retire(session, &handle).await;
                    let state = last.unwrap_or(state);
                    return self.after_entry_stopped(session, leg, &state, &handle, now);
                }
                if now.saturating_duration_since(order.last_bump) < self.params.first_leg_bump {
                    return HedgeState::FirstLegBidding { order };
                }
                self.bump_entry(session, order, state.filled_size, now).await
            }
        }
    }

    async fn after_entry(&self, session: &mut MarketSession, leg: Leg, fill_price: Decimal, now: Instant) -> HedgeState {
        let held_avg = self.held_avg(session, leg, Some(fill_price));
        match self.attempt_hedge(session, leg, held_avg, now, false).await {
            HedgeAttempt::Complete => HedgeState::Scanning,
            _ => HedgeState::WaitingForHedge {
                leg,
                fill_price,
                exposed_since: now,
            },
        }
    }

    fn after_entry_stopped(
        &self,
        session: &MarketSession,
        leg: Leg,
        state: &OrderState,
        handle: &OrderHandle,
        now: Instant,
    ) -> HedgeState {
        match self.exposed(session, leg) {
            Some(_) if state.filled_size > Decimal::ZERO => HedgeState::WaitingForHedge {
                leg,
                fill_price: state.avg_fill_price.unwrap_or(handle.price),
                exposed_since: now,
            },
            _ => HedgeState::Scanning,
        }
    }

    async fn bump_entry(
        &self,
        session: &mut MarketSession,
        order: RestingOrder,
        filled: Decimal,
        now: Instant,
    ) -> HedgeState {
        let handle = order.handle.clone();
        let Some(own) = self.quote(session, handle.leg).await else {
            return HedgeState::FirstLegBidding { order };
        };
        let Some(next) = pricing::bump_entry(&self.params, session.market.tick_size, handle.price, &own) else {
            return HedgeState::FirstLegBidding {
                order: RestingOrder { last_bump: now, ..order },
            };
        };

        match self.gateway.cancel(&handle).await {
            Ok(CancelOutcome::Cancelled) => {}
            Ok(_) => return HedgeState::FirstLegBidding { order },
            Err(e) => {
                warn!(order_id = %handle.order_id, error = %e, "Reprice cancel failed");
                return HedgeState::FirstLegBidding { order };
            }
        }
        // Fills that landed before the cancel.
        let filled = self
            .poll(session, &handle)
            .await
            .map(|(s, _)| s.filled_size)
            .unwrap_or(filled);

        let size = handle.size - filled;
        if size <= Decimal::ZERO {
            return self.after_entry(session, handle.leg, handle.price, now).await;
        }

        match self
            .gateway
            .place_resting(&session.market, handle.leg, Side::Buy, next, size)
            .await
        {
            Some(new) => {
                debug!(from = %handle.price, to = %next, "Entry bumped");
                HedgeState::FirstLegBidding {
                    order: order.replaced(new, now),
                }
            }
            None if filled > Decimal::ZERO => HedgeState::WaitingForHedge {
                leg: handle.leg,
                fill_price: handle.price,
                exposed_since: now,
            },
            None => HedgeState::Scanning,
        }
    }

    // ---- Waiting for hedge --------------------------------------------

    async fn waiting(
        &self,
        session: &mut MarketSession,
        leg: Leg,
        fill_price: Decimal,
        exposed_since: Instant,
        now: Instant,
    ) -> HedgeState {
        let exposure = match session.ledger.imbalance() {
            Some(e) => e,
            None => return HedgeState::Scanning,
        };
        let held_avg = self.held_avg(session, exposure.leg, Some(fill_price));

        match self.attempt_hedge(session, exposure.leg, held_avg, now, true).await {
            HedgeAttempt::Complete => HedgeState::Scanning,
            HedgeAttempt::Resting(order, held_avg) => HedgeState::HedgeBidding {
                held_leg: exposure.leg,
                held_avg,
                order,
                exposed_since,
            },
            HedgeAttempt::Unavailable => {
                if now.saturating_duration_since(exposed_since) >= self.params.unhedged_timeout {
                    let exposure = session.ledger.imbalance();
                    warn!(%leg, shares = ?exposure.map(|e| e.shares), "Unhedged too long, closing");
                    return match exposure {
                        Some(e) => HedgeState::ClosingPosition {
                            leg: e.leg,
                            target: e.shares,
                            resting: None,
                        },
                        None => HedgeState::Scanning,
                    };
                }
                HedgeState::WaitingForHedge {
                    leg: exposure.leg,
                    fill_price,
                    exposed_since,
                }
            }
        }
    }

    // ---- Hedge bidding ------------------------------------------------

    async fn hedge_bidding(
        &self,
        session: &mut MarketSession,
        held_leg: Leg,
        held_avg: Decimal,
        order: RestingOrder,
        exposed_since: Instant,
        now: Instant,
    ) -> HedgeState {
        let handle = order.handle.clone();
        let Some((state, delta)) = self.poll(session, &handle).await else {
            return HedgeState::HedgeBidding {
                held_leg,
                held_avg,
                order,
                exposed_since,
            };
        };
        session.record_hedge(delta, held_avg, state.avg_fill_price.unwrap_or(handle.price));

        if self.exposed(session, held_leg).is_none() {
            if state.status.is_open() {
                self.retire(session, &handle).await;
            }
            self.pair_completed(session);
            return HedgeState::Scanning;
        }

        match state.status {
            // Imbalance grew while the hedge filled; scanning sizes a new one.
            OrderStatus::Filled => HedgeState::Scanning,
            OrderStatus::Cancelled => {
                info!(order_id = %handle.order_id, "Hedge cancelled externally");
                HedgeState::WaitingForHedge {
                    leg: held_leg,
                    fill_price: held_avg,
                    exposed_since,
                }
            }
            _ if now >= order.deadline => {
                info!(order_id = %handle.order_id, "Hedge timed out, closing position");
                self.retire(session, &handle).await;
                match session.ledger.imbalance() {
                    Some(e) => HedgeState::ClosingPosition {
                        leg: e.leg,
                        target: e.shares,
                        resting: None,
                    },
                    None => HedgeState::Scanning,
                }
            }
            _ if now.saturating_duration_since(order.last_bump) >= self.params.hedge_bump => {
                self.bump_hedge(session, held_leg, held_avg, order, exposed_since, now)
                    .await
            }
            _ => HedgeState::HedgeBidding {
                held_leg,
                held_avg,
                order,
                exposed_since,
            },
        }
    }

    async fn bump_hedge(
        &self,
        session: &mut MarketSession,
        held_leg: Leg,
        held_avg: Decimal,
        order: RestingOrder,
        exposed_since: Instant,
        now: Instant,
    ) -> HedgeState {
        let handle = order.handle.clone();
        let unchanged = |order: RestingOrder| HedgeState::HedgeBidding {
            held_leg,
            held_avg,
            order,
            exposed_since,
        };

        let Some(opposite) = self.quote(session, handle.leg).await else {
            return unchanged(order);
        };
        let Some(next) =
            pricing::bump_hedge(&self.params, session.market.tick_size, handle.price, held_avg, &opposite)
        else {
            return unchanged(RestingOrder { last_bump: now, ..order });
        };

        match self.gateway.cancel(&handle).await {
            Ok(CancelOutcome::Cancelled) => {}
            Ok(_) => return unchanged(order),
            Err(e) => {
                warn!(order_id = %handle.order_id, error = %e, "Reprice cancel failed");
                return unchanged(order);
            }
        }
        if let Some((state, delta)) = self.poll(session, &handle).await {
            session.record_hedge(delta, held_avg, state.avg_fill_price.unwrap_or(handle.price));
        }

        let Some(remaining) = self.exposed(session, held_leg) else {
            self.pair_completed(session);
            return HedgeState::Scanning;
        };

        match self
            .gateway
            .place_resting(&session.market, handle.leg, Side::Buy, next, remaining)
            .await
        {
            Some(new) => {
                debug!(from = %handle.price, to = %next, "Hedge bumped");
                unchanged(order.replaced(new, now))
            }
            None => HedgeState::WaitingForHedge {
                leg: held_leg,
                fill_price: held_avg,
                exposed_since,
            },
        }
    }

    // ---- Closing ------------------------------------------------------

    async fn closing(
        &self,
        session: &mut MarketSession,
        leg: Leg,
        target: Decimal,
        resting: Option<OrderHandle>,
    ) -> HedgeState {
        let mut resting = resting;
        if let Some(handle) = resting.clone() {
            if let Some((state, _)) = self.poll(session, &handle).await {
                if state.status.is_terminal() {
                    resting = None;
                }
            }
        }

        let target = target.min(self.exposed(session, leg).unwrap_or(Decimal::ZERO));

        if target <= Decimal::ZERO {
            if let Some(handle) = &resting {
                self.retire(session, handle).await;
            }
            session.stats.closes += 1;
            info!(%leg, "Position closed");
            return HedgeState::Scanning;
        }

        if resting.is_some() {
            return HedgeState::ClosingPosition { leg, target, resting };
        }

        let (target, resting) = self.sell_down(session, leg, target).await;
        HedgeState::ClosingPosition { leg, target, resting }
    }

    /// Immediate sell at the best bid, then rest any remainder at the floor.
    async fn sell_down(
        &self,
        session: &mut MarketSession,
        leg: Leg,
        qty: Decimal,
    ) -> (Decimal, Option<OrderHandle>) {
        let mut remaining = qty;

        let bid = self.quote(session, leg).await.and_then(|q| q.crossable_bid());
        if let Some(bid) = bid.filter(|b| *b >= self.params.min_sell_price) {
            let fill = self
                .gateway
                .place_immediate(&session.market, leg, Side::Sell, bid, remaining)
                .await;
            let sold = self.account_immediate(session, leg, Side::Sell, &fill, bid);
            if sold > Decimal::ZERO {
                info!(%leg, price = %bid, %sold, "Sold at bid");
            }
            remaining = (remaining - sold).max(Decimal::ZERO);
        }

        if remaining <= Decimal::ZERO {
            return (remaining, None);
        }

        let handle = self
            .gateway
            .place_resting(&session.market, leg, Side::Sell, self.params.min_sell_price, remaining)
            .await;
        (remaining, handle)
    }

    // ---- Pause / force close ------------------------------------------

    async fn pause(&self, session: &mut MarketSession) {
        if matches!(session.state, HedgeState::Paused { force_close: None }) {
            return;
        }
        self.cancel_all(session).await;
        session.state = HedgeState::Paused { force_close: None };
        info!("Paused until next market");
    }

    async fn force_close(&self, session: &mut MarketSession) {
        let mut fc = match std::mem::take(&mut session.state) {
            HedgeState::Paused {
                force_close: Some(fc),
            } => fc,
            other => {
                session.state = other;
                self.cancel_all(session).await;
                if session.force_close_taken {
                    session.state = HedgeState::Paused { force_close: None };
                    return;
                }
                let Some(exposure) = session.ledger.imbalance() else {
                    session.state = HedgeState::Paused { force_close: None };
                    return;
                };
                session.force_close_taken = true;
                session.stats.force_closes += 1;
                metrics::inc_force_closes();
                warn!(leg = %exposure.leg, target = %exposure.shares, "Force close");
                ForceClose {
                    leg: exposure.leg,
                    target: exposure.shares,
                    sold: Decimal::ZERO,
                    resting: None,
                }
            }
        };

        if let Some(handle) = fc.resting.take() {
            let (_, sold) = self.retire(session, &handle).await;
            fc.sold += sold;
        }

        let remaining = fc.remaining().min(session.ledger.reconciled_shares(fc.leg));
        if remaining <= Decimal::ZERO {
            info!(leg = %fc.leg, sold = %fc.sold, "Force close complete");
            session.state = HedgeState::Paused { force_close: None };
            return;
        }

        let (left, resting) = self.sell_down(session, fc.leg, remaining).await;
        fc.sold += remaining - left;
        fc.resting = resting;

        if fc.remaining() <= Decimal::ZERO && fc.resting.is_none() {
            info!(leg = %fc.leg, sold = %fc.sold, "Force close complete");
            session.state = HedgeState::Paused { force_close: None };
        } else {
            session.state = HedgeState::Paused {
                force_close: Some(fc),
            };
        }
    }
}
