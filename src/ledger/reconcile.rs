//! Per-market position ledger reconciling local fills with remote positions.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::position::{FillNotice, LocalPosition, Position, PositionSource, RemotePosition};
use crate::gateway::Side;
use crate::market::{Leg, LegPair, Market};
use crate::metrics;

/// Excess shares held on one leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Exposure {
    /// Leg holding more shares.
    pub leg: Leg,
    /// Share difference.
    pub shares: Decimal,
}

/// Serializable view of the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    /// Reconciled position per leg.
    pub reconciled: LegPair<Position>,
    /// Local share count per leg.
    pub local: LegPair<Decimal>,
    /// Last remote share count per leg.
    pub remote: LegPair<Option<Decimal>>,
    /// Current imbalance, if any.
    pub imbalance: Option<Exposure>,
}

/// Fast optimistic local view merged with a slow authoritative remote view.
///
/// `local` moves the instant a fill is observed. `remote` is replaced on each
/// refresh. Sells the remote has not reflected yet are tracked separately so
/// a lagging remote cannot bring sold shares back. Shares local was raised by
/// after the first refresh are held as unattributed until a buy fill claims
/// them, so a fill seen by the remote first is not counted twice.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    up_token: String,
    down_token: String,
    local: LegPair<LocalPosition>,
    remote: LegPair<Option<Position>>,
    unconfirmed_sells: LegPair<Decimal>,
    unattributed: LegPair<Decimal>,
    fills_seen: HashMap<String, Decimal>,
    last_refresh: Option<Instant>,
}

impl PositionLedger {
    /// Empty ledger for a market.
    pub fn new(market: &Market) -> Self {
        Self {
            up_token: market.up_token_id.clone(),
            down_token: market.down_token_id.clone(),
            local: LegPair::default(),
            remote: LegPair::default(),
            unconfirmed_sells: LegPair::default(),
            unattributed: LegPair::default(),
            fills_seen: HashMap::new(),
            last_refresh: None,
        }
    }

    fn leg_for_token(&self, token_id: &str) -> Option<Leg> {
        if token_id == self.up_token {
            Some(Leg::Up)
        } else if token_id == self.down_token {
            Some(Leg::Down)
        } else {
            None
        }
    }

    /// Record a fill; returns the newly counted size (zero for a repeat).
    pub fn observe_fill(&mut self, fill: &FillNotice) -> Decimal {
        let seen = self.fills_seen.entry(fill.order_id.clone()).or_default();
        let delta = fill.cumulative_filled - *seen;
        if delta <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        *seen = fill.cumulative_filled;

        match fill.side {
            Side::Buy => {
                let claimed = delta.min(self.unattributed[fill.leg]);
                self.unattributed[fill.leg] -= claimed;
                if delta > claimed {
                    self.local[fill.leg].buy(delta - claimed, fill.price);
                }
            }
            Side::Sell => {
                let removed = self.local[fill.leg].sell(delta);
                self.unconfirmed_sells[fill.leg] += removed;
            }
        }

        debug!(
            order_id = %fill.order_id,
            leg = %fill.leg,
            side = %fill.side,
            delta = %delta,
            local = %self.local[fill.leg].shares,
            "Fill observed"
        );
        delta
    }

    /// Replace the remote view and raise local counts to it.
    pub fn apply_remote(&mut self, positions: &[RemotePosition], now: Instant) {
        let mut fresh: LegPair<Option<RemotePosition>> = LegPair::default();
        for row in positions {
            if let Some(leg) = self.leg_for_token(&row.token_id) {
                fresh[leg] = Some(row.clone());
            }
        }

        for leg in Leg::BOTH {
            let shares = fresh[leg].as_ref().map(|r| r.shares).unwrap_or(Decimal::ZERO);
            let remote_avg = fresh[leg].as_ref().and_then(|r| r.avg_cost);
            let previous = self.remote[leg].map(|p| p.shares).unwrap_or(Decimal::ZERO);

            // A drop confirms our own sells first, then withdraws shares
            // local only holds because an earlier refresh reported them.
            if shares < previous {
                let mut drop = previous - shares;
                let confirmed = drop.min(self.unconfirmed_sells[leg]);
                self.unconfirmed_sells[leg] -= confirmed;
                drop -= confirmed;
                let withdrawn = drop.min(self.unattributed[leg]);
                if withdrawn > Decimal::ZERO {
                    self.unattributed[leg] -= withdrawn;
                    self.local[leg].sell(withdrawn);
                }
            }
            // Sells still pending can never exceed what remote holds over local.
            let headroom = (shares - self.local[leg].shares).max(Decimal::ZERO);
            self.unconfirmed_sells[leg] = self.unconfirmed_sells[leg].min(headroom);

            self.remote[leg] = Some(Position::new(shares, remote_avg.unwrap_or(Decimal::ZERO)));

            let effective = self.effective_remote(leg);
            let local = &mut self.local[leg];
            if effective > local.shares {
                let missing = effective - local.shares;
                match remote_avg.or_else(|| local.avg_cost()) {
                    Some(price) => local.buy(missing, price),
                    None => local.buy_unpriced(missing),
                }
                // The first refresh is the starting inventory, not a fill.
                if self.last_refresh.is_some() {
                    self.unattributed[leg] += missing;
                }
            }
        }
        self.last_refresh = Some(now);
    }

    /// Fetch remote positions; on failure keep the last known view.
    #[instrument(skip(self, source), level = "debug")]
    pub async fn refresh(&mut self, source: &dyn PositionSource) -> bool {
        let _timer = metrics::timer_ledger_refresh();
        match source.positions().await {
            Ok(positions) => {
                self.apply_remote(&positions, Instant::now());
                true
            }
            Err(e) => {
                warn!(error = %e, "Position refresh failed, keeping last known");
                false
            }
        }
    }

    /// Remote share count less sells the remote has not reflected yet.
    fn effective_remote(&self, leg: Leg) -> Decimal {
        let remote = self.remote[leg].map(|p| p.shares).unwrap_or(Decimal::ZERO);
        (remote - self.unconfirmed_sells[leg]).max(Decimal::ZERO)
    }

    /// Reconciled share count per leg: `max(local, remote)`.
    pub fn reconcile(&self) -> LegPair<Decimal> {
        LegPair::new(self.reconciled_shares(Leg::Up), self.reconciled_shares(Leg::Down))
    }

    /// Reconciled share count for one leg.
    pub fn reconciled_shares(&self, leg: Leg) -> Decimal {
        self.local[leg].shares.max(self.effective_remote(leg))
    }

    /// Average cost: remote when known, else the locally recorded cost basis.
    pub fn avg_cost(&self, leg: Leg) -> Option<Decimal> {
        match self.remote[leg] {
            Some(remote) if remote.shares > Decimal::ZERO && remote.avg_cost > Decimal::ZERO => {
                Some(remote.avg_cost)
            }
            _ => self.local[leg].avg_cost(),
        }
    }

    /// Reconciled position for one leg.
    pub fn position(&self, leg: Leg) -> Position {
        Position::new(
            self.reconciled_shares(leg),
            self.avg_cost(leg).unwrap_or(Decimal::ZERO),
        )
    }

    /// Local share count for one leg.
    pub fn local_shares(&self, leg: Leg) -> Decimal {
        self.local[leg].shares
    }

    /// Last remote share count for one leg.
    pub fn remote_shares(&self, leg: Leg) -> Option<Decimal> {
        self.remote[leg].map(|p| p.shares)
    }

    /// Leg holding excess shares and by how much.
    pub fn imbalance(&self) -> Option<Exposure> {
        let shares = self.reconcile();
        let diff = shares.up - shares.down;
        if diff > Decimal::ZERO {
            Some(Exposure { leg: Leg::Up, shares: diff })
        } else if diff < Decimal::ZERO {
            Some(Exposure { leg: Leg::Down, shares: -diff })
        } else {
            None
        }
    }

    /// Absolute imbalance in shares.
    pub fn imbalance_shares(&self) -> Decimal {
        self.imbalance().map(|e| e.shares).unwrap_or(Decimal::ZERO)
    }

    /// When the remote view was last replaced.
    pub fn last_refresh(&self) -> Option<Instant> {
        self.last_refresh
    }

    /// Serializable view.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let imbalance = self.imbalance();
        metrics::set_imbalance(
            imbalance
                .map(|e| match e.leg {
                    Leg::Up => e.shares,
                    Leg::Down => -e.shares,
                })
                .and_then(|d| d.to_f64())
                .unwrap_or(0.0),
        );
        LedgerSnapshot {
            reconciled: LegPair::new(self.position(Leg::Up), self.position(Leg::Down)),
            local: LegPair::new(self.local.up.shares, self.local.down.shares),
            remote: LegPair::new(self.remote_shares(Leg::Up), self.remote_shares(Leg::Down)),
            imbalance,
        }
    }
}
