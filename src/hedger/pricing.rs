//! Entry and hedge pricing rules.
//!
//! Everything here is pure: quotes and parameters in, prices out.

use rust_decimal::Decimal;
use strum::Display;

use crate::config::StrategyParams;
use crate::feed::QuoteView;
use crate::market::{Leg, LegPair};

/// Why no entry was placed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EntrySkip {
    /// A side of either book is empty.
    NoLiquidity,
    /// No price fits strictly inside the spread.
    NoRoom,
    /// Entry price above the configured ceiling.
    AboveCeiling,
    /// Opposite ask already puts a profitable hedge out of reach.
    HedgeOutOfReach,
}

/// First-leg order to place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPlan {
    /// Leg to buy.
    pub leg: Leg,
    /// Resting bid price.
    pub price: Decimal,
}

/// Leg whose best bid sits closest to 0.50; ties go to Up.
pub fn entry_leg(up_bid: Decimal, down_bid: Decimal) -> Leg {
    let half = Decimal::new(5, 1);
    if (down_bid - half).abs() < (up_bid - half).abs() {
        Leg::Down
    } else {
        Leg::Up
    }
}

/// Choose the first leg and its bid.
pub fn plan_entry(
    params: &StrategyParams,
    tick: Decimal,
    quotes: LegPair<&QuoteView>,
) -> Result<EntryPlan, EntrySkip> {
    if !quotes.up.quote.has_liquidity() || !quotes.down.quote.has_liquidity() {
        return Err(EntrySkip::NoLiquidity);
    }
    let (Some(up_bid), Some(down_bid)) = (quotes.up.best_bid(), quotes.down.best_bid()) else {
        return Err(EntrySkip::NoLiquidity);
    };

    let leg = entry_leg(up_bid, down_bid);
    let own = quotes[leg];
    let (Some(bid), Some(ask)) = (own.best_bid(), own.best_ask()) else {
        return Err(EntrySkip::NoLiquidity);
    };

    let price = (bid + tick).min(ask - tick).max(params.min_bid);
    if price >= ask {
        return Err(EntrySkip::NoRoom);
    }
    if price > params.max_entry_price.min(params.max_bid) {
        return Err(EntrySkip::AboveCeiling);
    }

    let opposite_ask = quotes[leg.opposite()]
        .best_ask()
        .ok_or(EntrySkip::NoLiquidity)?;
    if price + opposite_ask > params.entry_pair_cost_limit {
        return Err(EntrySkip::HedgeOutOfReach);
    }

    Ok(EntryPlan { leg, price })
}

/// Whether buying the opposite leg at `price` locks in a profit.
pub fn is_profitable(params: &StrategyParams, held_avg: Decimal, price: Decimal) -> bool {
    held_avg + price <= params.profit_ceiling
}

/// Crossing price for an immediate hedge, if fresh and profitable.
pub fn immediate_hedge_price(
    params: &StrategyParams,
    held_avg: Decimal,
    opposite: &QuoteView,
) -> Option<Decimal> {
    if opposite.quote.ask_size <= Decimal::ZERO {
        return None;
    }
    opposite
        .crossable_ask()
        .filter(|ask| is_profitable(params, held_avg, *ask))
}

/// Resting hedge bid one tick above the best bid, inside the spread and the
/// `[min_bid, max_bid]` band, if profitable.
pub fn resting_hedge_price(
    params: &StrategyParams,
    tick: Decimal,
    held_avg: Decimal,
    opposite: &QuoteView,
) -> Option<Decimal> {
    let mut price = opposite
        .best_bid()
        .map(|bid| bid + tick)
        .unwrap_or(params.min_bid);
    if let Some(ask) = opposite.best_ask() {
        price = price.min(ask - tick);
    }
    let price = price.max(params.min_bid).min(params.max_bid);

    if opposite.best_ask().is_some_and(|ask| price >= ask) {
        return None;
    }
    Some(price).filter(|p| is_profitable(params, held_avg, *p))
}

/// One tick up for a first-leg bid, or `None` when capped.
pub fn bump_entry(
    params: &StrategyParams,
    tick: Decimal,
    current: Decimal,
    own: &QuoteView,
) -> Option<Decimal> {
    let next = current + tick;
    let cap = params.max_entry_price.min(params.max_bid);
    if next > cap || own.best_ask().is_some_and(|ask| next >= ask) {
        return None;
    }
    Some(next)
}

/// One tick up for a hedge bid, or `None` when it would stop being profitable.
pub fn bump_hedge(
    params: &StrategyParams,
    tick: Decimal,
    current: Decimal,
    held_avg: Decimal,
    opposite: &QuoteView,
) -> Option<Decimal> {
    let next = current + tick;
    if next > params.max_bid || !is_profitable(params, held_avg, next) {
        return None;
    }
    if opposite.best_ask().is_some_and(|ask| next >= ask) {
        return None;
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Quote;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const TICK: Decimal = dec!(0.01);

    fn view(bid: Decimal, ask: Decimal) -> QuoteView {
        QuoteView {
            quote: Quote::two_sided(bid, ask, dec!(100)),
            age: Duration::ZERO,
            stale: false,
        }
    }

    fn params() -> StrategyParams {
        StrategyParams::default()
    }

    #[test]
    fn entry_picks_leg_nearest_midpoint() {
        assert_eq!(entry_leg(dec!(0.39), dec!(0.30)), Leg::Up);
        assert_eq!(entry_leg(dec!(0.30), dec!(0.52)), Leg::Down);
        assert_eq!(entry_leg(dec!(0.45), dec!(0.55)), Leg::Up);
    }

    #[test]
    fn entry_bids_one_tick_inside() {
        let up = view(dec!(0.39), dec!(0.42));
        let down = view(dec!(0.30), dec!(0.50));
        let plan = plan_entry(&params(), TICK, LegPair::new(&up, &down)).unwrap();
        assert_eq!(plan, EntryPlan { leg: Leg::Up, price: dec!(0.40) });
    }

    #[test]
    fn entry_joins_bid_on_one_tick_spread() {
        let up = view(dec!(0.40), dec!(0.41));
        let down = view(dec!(0.30), dec!(0.50));
        let plan = plan_entry(&params(), TICK, LegPair::new(&up, &down)).unwrap();
        assert_eq!(plan.price, dec!(0.40));
    }

    #[test]
    fn entry_needs_room_above_min_bid() {
        let up = view(dec!(0.01), dec!(0.02));
        let down = view(dec!(0.001), dec!(0.99));
        assert_eq!(
            plan_entry(&params(), TICK, LegPair::new(&up, &down)),
            Err(EntrySkip::NoRoom)
        );
    }

    #[test]
    fn entry_skips_above_ceiling() {
        let up = view(dec!(0.56), dec!(0.60));
        let down = view(dec!(0.30), dec!(0.40));
        assert_eq!(
            plan_entry(&params(), TICK, LegPair::new(&up, &down)),
            Err(EntrySkip::AboveCeiling)
        );
    }

    #[test]
    fn entry_skips_when_hedge_is_out_of_reach() {
        let up = view(dec!(0.48), dec!(0.52));
        let down = view(dec!(0.20), dec!(0.61));
        assert_eq!(
            plan_entry(&params(), TICK, LegPair::new(&up, &down)),
            Err(EntrySkip::HedgeOutOfReach)
        );
    }

    #[test]
    fn entry_needs_both_books() {
        let up = view(dec!(0.48), dec!(0.52));
        let empty = QuoteView {
            quote: Quote::empty(),
            age: Duration::ZERO,
            stale: false,
        };
        assert_eq!(
            plan_entry(&params(), TICK, LegPair::new(&up, &empty)),
            Err(EntrySkip::NoLiquidity)
        );
    }

    #[test]
    fn immediate_hedge_requires_fresh_profitable_ask() {
        let p = params();
        let down = view(dec!(0.48), dec!(0.50));
        assert_eq!(immediate_hedge_price(&p, dec!(0.40), &down), Some(dec!(0.50)));
        assert_eq!(immediate_hedge_price(&p, dec!(0.47), &down), None);

        let stale = QuoteView { stale: true, ..down };
        assert_eq!(immediate_hedge_price(&p, dec!(0.40), &stale), None);
    }

    #[test]
    fn resting_hedge_at_ceiling_is_allowed() {
        let down = view(dec!(0.50), dec!(0.60));
        assert_eq!(
            resting_hedge_price(&params(), TICK, dec!(0.45), &down),
            Some(dec!(0.51))
        );
        assert_eq!(resting_hedge_price(&params(), TICK, dec!(0.46), &down), None);
    }

    #[test]
    fn resting_hedge_stays_in_band() {
        let p = params();
        let low = view(dec!(0.001), dec!(0.05));
        assert_eq!(resting_hedge_price(&p, TICK, dec!(0.40), &low), Some(p.min_bid));

        let high = view(dec!(0.93), dec!(0.97));
        assert_eq!(resting_hedge_price(&p, TICK, dec!(0.01), &high), Some(p.max_bid));
    }

    #[test]
    fn bumps_stop_at_caps() {
        let p = params();
        let own = view(dec!(0.40), dec!(0.60));
        assert_eq!(bump_entry(&p, TICK, dec!(0.41), &own), Some(dec!(0.42)));
        assert_eq!(bump_entry(&p, TICK, dec!(0.55), &own), None);

        let tight = view(dec!(0.40), dec!(0.42));
        assert_eq!(bump_entry(&p, TICK, dec!(0.41), &tight), None);

        let opposite = view(dec!(0.45), dec!(0.60));
        assert_eq!(bump_hedge(&p, TICK, dec!(0.50), dec!(0.45), &opposite), Some(dec!(0.51)));
        assert_eq!(bump_hedge(&p, TICK, dec!(0.51), dec!(0.45), &opposite), None);
    }
}
