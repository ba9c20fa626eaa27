//! End-to-end hedging scenarios against the simulated exchange.

mod common;

use std::time::Duration;

use common::{Harness, PLENTY};
use polymarket_hedge::feed::Quote;
use polymarket_hedge::gateway::Side;
use polymarket_hedge::hedger::{HedgeState, HedgeStateKind};
use polymarket_hedge::market::Leg;
use polymarket_hedge::risk::RiskPhase;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test]
async fn entry_fill_is_hedged_immediately_when_ask_is_profitable() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));

    h.tick(PLENTY).await;
    let entry = match &h.session.state {
        HedgeState::FirstLegBidding { order } => order.handle.clone(),
        other => panic!("expected entry bid, got {other:?}"),
    };
    assert_eq!(entry.leg, Leg::Up);
    assert_eq!(entry.price, dec!(0.40));
    assert_eq!(entry.size, dec!(10));

    // Ask drops onto the bid; opposite ask now hedges at 0.90.
    h.quote(Leg::Up, dec!(0.38), dec!(0.40));
    h.quote(Leg::Down, dec!(0.48), dec!(0.50));
    h.tick(PLENTY).await;

    assert!(h.is_scanning());
    assert_eq!(h.shares(Leg::Up), dec!(10));
    assert_eq!(h.shares(Leg::Down), dec!(10));
    assert!(h.session.ledger.imbalance().is_none());
    assert_eq!(h.session.stats.pairs_completed, 1);
    assert_eq!(h.profit.total(), dec!(1));
    assert_eq!(h.sim.shares(&h.token(Leg::Down)), dec!(10));
}

#[tokio::test]
async fn unprofitable_ask_leads_to_resting_hedge_one_tick_above_bid() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.44), dec!(0.47));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;
    assert_eq!(h.open_orders()[0].price, dec!(0.45));

    h.quote(Leg::Up, dec!(0.43), dec!(0.45));
    h.quote(Leg::Down, dec!(0.50), dec!(0.60));
    h.tick(PLENTY).await;
    assert_eq!(h.session.state.kind(), HedgeStateKind::WaitingForHedge);

    h.tick(PLENTY).await;
    let (held_avg, hedge) = match &h.session.state {
        HedgeState::HedgeBidding {
            held_leg,
            held_avg,
            order,
            ..
        } => {
            assert_eq!(*held_leg, Leg::Up);
            (*held_avg, order.handle.clone())
        }
        other => panic!("expected hedge bid, got {other:?}"),
    };
    assert_eq!(held_avg, dec!(0.45));
    assert_eq!(hedge.leg, Leg::Down);
    assert_eq!(hedge.side, Side::Buy);
    assert_eq!(hedge.price, dec!(0.51));
    assert_eq!(hedge.size, dec!(10));

    // Seller hits the hedge bid.
    h.quote(Leg::Down, dec!(0.49), dec!(0.51));
    h.tick(PLENTY).await;

    assert!(h.is_scanning());
    assert_eq!(h.session.stats.pairs_completed, 1);
    assert_eq!(h.session.stats.realized_profit, dec!(0.40));
    assert_eq!(h.profit.total(), dec!(0.4));
}

#[tokio::test]
async fn excess_imbalance_only_places_hedge_orders() {
    let mut h = Harness::new();
    h.hold(Leg::Up, dec!(12), dec!(0.45));
    h.quote(Leg::Up, dec!(0.44), dec!(0.47));
    h.quote(Leg::Down, dec!(0.40), dec!(0.60));

    h.tick(secs(360)).await;

    assert_eq!(h.session.last_phase, Some(RiskPhase::HedgeOnly));
    let orders = h.open_orders();
    assert_eq!(orders.len(), 1);
    assert!(orders.iter().all(|o| o.leg == Leg::Down && o.side == Side::Buy));
    assert_eq!(orders[0].price, dec!(0.41));
    assert_eq!(orders[0].size, dec!(12));
    assert_eq!(h.sim.open_order_count(), 1);
}

#[tokio::test]
async fn hedge_only_without_profitable_hedge_places_nothing() {
    let mut h = Harness::new();
    h.hold(Leg::Up, dec!(12), dec!(0.50));
    h.quote(Leg::Up, dec!(0.44), dec!(0.47));
    h.quote(Leg::Down, dec!(0.50), dec!(0.60));

    h.tick(secs(360)).await;
    h.tick(secs(359)).await;

    assert_eq!(h.session.last_phase, Some(RiskPhase::HedgeOnly));
    assert!(h.is_scanning());
    assert_eq!(h.sim.open_order_count(), 0);
    assert_eq!(h.session.stats.entries, 0);
}

#[tokio::test]
async fn force_close_sells_snapshot_and_ignores_opposite_fills() {
    let mut h = Harness::new();
    h.hold(Leg::Up, dec!(8), dec!(0.45));
    h.set_quote(
        Leg::Up,
        Quote::new(Some(dec!(0.30)), Some(dec!(0.35)), dec!(5), dec!(100)),
    );
    h.quote(Leg::Down, dec!(0.60), dec!(0.65));

    h.tick(secs(240)).await;
    assert_eq!(h.session.last_phase, Some(RiskPhase::ForceClose));
    let first_remaining = match &h.session.state {
        HedgeState::Paused {
            force_close: Some(fc),
        } => {
            assert_eq!(fc.leg, Leg::Up);
            assert_eq!(fc.target, dec!(8));
            assert_eq!(fc.sold, dec!(5));
            assert!(fc.resting.is_some());
            fc.remaining()
        }
        other => panic!("expected force close, got {other:?}"),
    };
    assert_eq!(first_remaining, dec!(3));

    // Down fills land mid-unwind; the snapshot must not grow or move.
    h.hold(Leg::Down, dec!(4), dec!(0.60));
    h.tick(secs(239)).await;

    assert_eq!(
        h.session.state,
        HedgeState::Paused { force_close: None }
    );
    assert_eq!(h.sim.shares(&h.token(Leg::Up)), Decimal::ZERO);
    assert_eq!(h.session.stats.force_closes, 1);

    // Still imbalanced (Down now heavy) but the unwind happens once.
    h.tick(secs(238)).await;
    assert_eq!(h.session.last_phase, Some(RiskPhase::ForceClose));
    assert_eq!(h.session.state, HedgeState::Paused { force_close: None });
    assert_eq!(h.sim.shares(&h.token(Leg::Down)), dec!(4));
    assert_eq!(h.sim.open_order_count(), 0);
    assert_eq!(h.session.stats.force_closes, 1);
}

#[tokio::test]
async fn stop_window_withdraws_entry_and_pauses() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;
    assert_eq!(h.sim.open_order_count(), 1);

    h.tick(secs(320)).await;

    assert_eq!(h.session.last_phase, Some(RiskPhase::PauseNoImbalance));
    assert_eq!(h.session.state, HedgeState::Paused { force_close: None });
    assert_eq!(h.sim.open_order_count(), 0);
}

#[tokio::test]
async fn unhedged_leg_is_closed_after_timeout() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.44), dec!(0.47));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;

    h.quote(Leg::Up, dec!(0.43), dec!(0.45));
    h.quote(Leg::Down, dec!(0.55), dec!(0.60));
    h.tick(PLENTY).await;
    assert_eq!(h.session.state.kind(), HedgeStateKind::WaitingForHedge);

    h.tick_at(secs(60), PLENTY).await;
    assert_eq!(h.session.state.kind(), HedgeStateKind::WaitingForHedge);

    h.tick_at(secs(121), PLENTY).await;
    assert_eq!(
        h.session.state,
        HedgeState::ClosingPosition {
            leg: Leg::Up,
            target: dec!(10),
            resting: None,
        }
    );

    h.tick_at(secs(122), PLENTY).await;
    assert_eq!(h.sim.shares(&h.token(Leg::Up)), Decimal::ZERO);

    h.tick_at(secs(123), PLENTY).await;
    assert!(h.is_scanning());
    assert_eq!(h.session.stats.closes, 1);
    assert_eq!(h.shares(Leg::Up), Decimal::ZERO);
}

#[tokio::test]
async fn entry_bumps_stay_inside_the_bid_band() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.39), dec!(0.44));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));

    let params = h.machine.params().clone();
    let mut prices = Vec::new();
    for step in 0..10u64 {
        h.tick_at(secs(step * 6), PLENTY).await;
        for order in h.open_orders() {
            assert!(order.price >= params.min_bid);
            assert!(order.price <= params.max_bid.min(params.max_entry_price));
            prices.push(order.price);
        }
    }

    assert_eq!(prices.first(), Some(&dec!(0.40)));
    assert!(prices.contains(&dec!(0.42)));
    assert!(prices.iter().all(|p| *p < dec!(0.44)));
}

#[tokio::test]
async fn cancelling_twice_leaves_the_same_ledger() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;

    let entry = h.open_orders()[0].clone();
    h.sim.fill_resting(&entry.order_id, dec!(4));
    let bidding = h.session.state.clone();

    h.machine.cancel_all(&mut h.session).await;
    let once = h.session.ledger.snapshot();
    assert_eq!(once.local.up, dec!(4));
    assert!(h.is_scanning());

    // Same order again: the venue reports it already cancelled.
    h.session.state = bidding;
    h.machine.cancel_all(&mut h.session).await;
    let twice = h.session.ledger.snapshot();
    assert_eq!(once.local, twice.local);
    assert_eq!(h.sim.open_order_count(), 0);
}

#[tokio::test]
async fn cancel_after_fill_counts_the_fill_once() {
    let mut h = Harness::new();
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;

    let entry = h.open_orders()[0].clone();
    h.sim.fill_resting(&entry.order_id, dec!(10));

    h.machine.cancel_all(&mut h.session).await;
    assert_eq!(h.session.ledger.local_shares(Leg::Up), dec!(10));

    // Remote catches up; the already counted fill is not added again.
    h.tick(PLENTY).await;
    assert_eq!(h.shares(Leg::Up), dec!(10));
    assert_eq!(h.session.ledger.local_shares(Leg::Up), dec!(10));
}

#[tokio::test]
async fn lagging_remote_is_reconciled_by_max() {
    let mut h = Harness::new();
    h.sim.set_remote_lag(2);
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;

    // Fill visible on the order, not yet on the position endpoint.
    h.quote(Leg::Up, dec!(0.38), dec!(0.40));
    h.quote(Leg::Down, dec!(0.10), dec!(0.70));

    for _ in 0..4 {
        h.tick(PLENTY).await;
        let snap = h.session.ledger.snapshot();
        for leg in Leg::BOTH {
            let local = snap.local[leg];
            let remote = snap.remote[leg].unwrap_or(Decimal::ZERO);
            assert_eq!(snap.reconciled[leg].shares, local.max(remote));
            assert!(local >= remote);
        }
    }
    assert_eq!(h.shares(Leg::Up), dec!(10));
    assert_eq!(h.session.ledger.remote_shares(Leg::Up), Some(dec!(10)));
}

#[tokio::test]
async fn position_outage_keeps_last_known_view() {
    let mut h = Harness::new();
    h.hold(Leg::Up, dec!(6), dec!(0.40));
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.70), dec!(0.80));
    h.tick(PLENTY).await;
    assert_eq!(h.shares(Leg::Up), dec!(6));

    h.sim.fail_positions(true);
    h.tick(PLENTY).await;
    assert_eq!(h.shares(Leg::Up), dec!(6));
    assert_eq!(h.session.ledger.remote_shares(Leg::Up), Some(dec!(6)));
}

#[tokio::test]
async fn hedge_fill_without_order_id_is_not_bought_twice() {
    let mut h = Harness::new();
    h.sim.set_remote_lag(2);
    h.quote(Leg::Up, dec!(0.39), dec!(0.42));
    h.quote(Leg::Down, dec!(0.30), dec!(0.60));
    h.tick(PLENTY).await;

    // Entry fills; the immediate hedge is acknowledged without an id.
    h.sim.drop_next_order_ids(1);
    h.quote(Leg::Up, dec!(0.38), dec!(0.40));
    h.quote(Leg::Down, dec!(0.48), dec!(0.50));
    h.tick(PLENTY).await;

    assert_eq!(h.session.stats.pairs_completed, 1);
    assert_eq!(h.session.ledger.local_shares(Leg::Down), dec!(10));

    for _ in 0..4 {
        h.tick(PLENTY).await;
    }
    assert_eq!(h.sim.shares(&h.token(Leg::Down)), dec!(10));
    assert_eq!(h.shares(Leg::Down), dec!(10));
    assert_eq!(h.session.stats.hedges, 1);
}
