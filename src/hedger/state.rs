//! Hedging states.

use rust_decimal::Decimal;
use serde::Serialize;
use strum::{Display, EnumDiscriminants, IntoStaticStr};
use tokio::time::Instant;

use crate::gateway::OrderHandle;
use crate::market::Leg;

/// A resting order the machine is working, with its timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestingOrder {
    /// Live order.
    pub handle: OrderHandle,
    /// When this leg of work started (kept across reprices).
    pub committed_at: Instant,
    /// Last placement or reprice.
    pub last_bump: Instant,
    /// Give up after this.
    pub deadline: Instant,
}

impl RestingOrder {
    /// Track a freshly placed order.
    pub fn new(handle: OrderHandle, now: Instant, deadline: Instant) -> Self {
        Self {
            handle,
            committed_at: now,
            last_bump: now,
            deadline,
        }
    }

    /// Same timers, new order.
    pub fn replaced(&self, handle: OrderHandle, now: Instant) -> Self {
        Self {
            handle,
            committed_at: self.committed_at,
            last_bump: now,
            deadline: self.deadline,
        }
    }
}

/// One-time unwind of the imbalance before expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForceClose {
    /// Leg being sold.
    pub leg: Leg,
    /// Quantity fixed when the unwind began.
    pub target: Decimal,
    /// Sold so far.
    pub sold: Decimal,
    /// Current resting sell, if any.
    pub resting: Option<OrderHandle>,
}

impl ForceClose {
    /// Quantity still to sell.
    pub fn remaining(&self) -> Decimal {
        (self.target - self.sold).max(Decimal::ZERO)
    }
}

/// Per-market hedging state. Exactly one is active per market.
#[derive(Debug, Clone, Default, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(HedgeStateKind))]
#[strum_discriminants(derive(Display, IntoStaticStr, Serialize))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
#[strum_discriminants(serde(rename_all = "snake_case"))]
pub enum HedgeState {
    /// Looking for an entry or an imbalance to hedge.
    #[default]
    Scanning,
    /// Resting bid for the first leg.
    FirstLegBidding {
        /// The entry order.
        order: RestingOrder,
    },
    /// First leg held, no hedge order yet.
    WaitingForHedge {
        /// Held leg.
        leg: Leg,
        /// Price the held leg filled at.
        fill_price: Decimal,
        /// When the exposure began.
        exposed_since: Instant,
    },
    /// Resting bid on the opposite leg.
    HedgeBidding {
        /// Held leg.
        held_leg: Leg,
        /// Average cost of the held leg when the hedge was priced.
        held_avg: Decimal,
        /// The hedge order.
        order: RestingOrder,
        /// When the exposure began.
        exposed_since: Instant,
    },
    /// Selling the exposed leg back.
    ClosingPosition {
        /// Leg being sold.
        leg: Leg,
        /// Shares still to sell; never increases.
        target: Decimal,
        /// Current resting sell, if any.
        resting: Option<OrderHandle>,
    },
    /// No new exposure until the next market.
    Paused {
        /// Unwind in progress, if the imbalance was non-zero.
        force_close: Option<ForceClose>,
    },
}

impl HedgeState {
    /// Discriminant for logging and metrics.
    pub fn kind(&self) -> HedgeStateKind {
        self.into()
    }

    /// Live orders this state owns.
    pub fn open_orders(&self) -> Vec<&OrderHandle> {
        match self {
            HedgeState::FirstLegBidding { order } | HedgeState::HedgeBidding { order, .. } => {
                vec![&order.handle]
            }
            HedgeState::ClosingPosition { resting, .. } => resting.iter().collect(),
            HedgeState::Paused {
                force_close: Some(fc),
            } => fc.resting.iter().collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Side;
    use rust_decimal_macros::dec;

    fn handle(id: &str) -> OrderHandle {
        OrderHandle {
            order_id: id.to_string(),
            leg: Leg::Up,
            side: Side::Sell,
            price: dec!(0.01),
            size: dec!(3),
            placed_at: Instant::now(),
        }
    }

    #[test]
    fn kind_labels() {
        assert_eq!(HedgeState::Scanning.kind().to_string(), "scanning");
        let paused = HedgeState::Paused { force_close: None };
        let label: &'static str = paused.kind().into();
        assert_eq!(label, "paused");
    }

    #[test]
    fn open_orders_per_state() {
        assert!(HedgeState::Scanning.open_orders().is_empty());

        let closing = HedgeState::ClosingPosition {
            leg: Leg::Up,
            target: dec!(3),
            resting: Some(handle("s1")),
        };
        assert_eq!(closing.open_orders().len(), 1);

        let fc = HedgeState::Paused {
            force_close: Some(ForceClose {
                leg: Leg::Up,
                target: dec!(8),
                sold: dec!(5),
                resting: None,
            }),
        };
        assert!(fc.open_orders().is_empty());
    }

    #[test]
    fn force_close_remaining_saturates() {
        let fc = ForceClose {
            leg: Leg::Up,
            target: dec!(8),
            sold: dec!(9),
            resting: None,
        };
        assert_eq!(fc.remaining(), Decimal::ZERO);
    }
}
