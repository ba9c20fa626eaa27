//! Per-market session: ledger, state and counters for one market window.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::Instant;

use super::state::{HedgeState, HedgeStateKind};
use crate::ledger::{LedgerSnapshot, PositionLedger};
use crate::market::Market;
use crate::metrics;
use crate::risk::RiskPhase;

const MICROS: i64 = 1_000_000;

/// Cumulative locked-in profit shared by every market's machine.
///
/// Stored as integer micro-dollars so concurrent sessions add atomically.
#[derive(Debug, Clone, Default)]
pub struct ProfitCounter(Arc<AtomicI64>);

impl ProfitCounter {
    /// Zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an amount (may be negative).
    pub fn add(&self, amount: Decimal) {
        let micros = (amount * Decimal::from(MICROS)).round().to_i64().unwrap_or(0);
        let total = self.0.fetch_add(micros, Ordering::Relaxed) + micros;
        metrics::set_cumulative_profit(total as f64 / MICROS as f64);
    }

    /// Current total.
    pub fn total(&self) -> Decimal {
        Decimal::new(self.0.load(Ordering::Relaxed), 6).normalize()
    }
}

/// Counters for one market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Entry orders placed.
    pub entries: u32,
    /// Hedge fills observed.
    pub hedges: u32,
    /// Imbalances fully hedged.
    pub pairs_completed: u32,
    /// Shares bought on the hedge side.
    pub hedged_shares: Decimal,
    /// Forced unwinds started.
    pub force_closes: u32,
    /// Voluntary unwinds finished.
    pub closes: u32,
    /// Profit locked in by hedges this market.
    pub realized_profit: Decimal,
}

/// Status view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Market slug.
    pub market: String,
    /// Seconds until expiry.
    pub time_to_expiry_secs: u64,
    /// Current state.
    pub state: HedgeStateKind,
    /// Last risk phase.
    pub phase: Option<RiskPhase>,
    /// Positions.
    pub ledger: LedgerSnapshot,
    /// Counters.
    pub stats: SessionStats,
    /// Open order ids.
    pub open_orders: Vec<String>,
    /// Profit across all markets.
    pub cumulative_profit: Decimal,
}

/// Everything the machine tracks for one market.
#[derive(Debug)]
pub struct MarketSession {
    /// The market being traded.
    pub market: Market,
    /// Position ledger.
    pub ledger: PositionLedger,
    /// Current state.
    pub state: HedgeState,
    /// Counters.
    pub stats: SessionStats,
    /// Last phase from the governor.
    pub last_phase: Option<RiskPhase>,
    /// Whether the one-time force-close snapshot was taken.
    pub force_close_taken: bool,
    /// When the session began.
    pub started_at: Instant,
    profit: ProfitCounter,
}

impl MarketSession {
    /// Fresh session for a market.
    pub fn new(market: Market, profit: ProfitCounter) -> Self {
        Self {
            ledger: PositionLedger::new(&market),
            market,
            state: HedgeState::Scanning,
            stats: SessionStats::default(),
            last_phase: None,
            force_close_taken: false,
            started_at: Instant::now(),
            profit,
        }
    }

    /// Record hedge shares bought at `price` against a leg held at `held_avg`.
    pub fn record_hedge(&mut self, shares: Decimal, held_avg: Decimal, price: Decimal) {
        if shares <= Decimal::ZERO {
            return;
        }
        let locked = shares * (Decimal::ONE - (held_avg + price));
        self.stats.hedges += 1;
        self.stats.hedged_shares += shares;
        self.stats.realized_profit += locked;
        self.profit.add(locked);
    }

    /// Shared profit counter.
    pub fn profit(&self) -> &ProfitCounter {
        &self.profit
    }

    /// Status view.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            market: self.market.slug.clone(),
            time_to_expiry_secs: self.market.time_to_expiry().as_secs(),
            state: self.state.kind(),
            phase: self.last_phase,
            ledger: self.ledger.snapshot(),
            stats: self.stats.clone(),
            open_orders: self
                .state
                .open_orders()
                .into_iter()
                .map(|h| h.order_id.clone())
                .collect(),
            cumulative_profit: self.profit.total(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::SimulatedExchange;
    use rust_decimal_macros::dec;

    #[test]
    fn profit_counter_is_shared() {
        let a = ProfitCounter::new();
        let b = a.clone();
        a.add(dec!(0.4));
        b.add(dec!(0.25));
        assert_eq!(a.total(), dec!(0.65));
    }

    #[test]
    fn hedge_locks_in_pair_profit() {
        let profit = ProfitCounter::new();
        let mut session = MarketSession::new(SimulatedExchange::sample_market(), profit.clone());
        session.record_hedge(dec!(10), dec!(0.40), dec!(0.50));

        assert_eq!(session.stats.hedges, 1);
        assert_eq!(session.stats.realized_profit, dec!(1.00));
        assert_eq!(profit.total(), dec!(1));
    }

    #[test]
    fn snapshot_reports_state() {
        let session = MarketSession::new(SimulatedExchange::sample_market(), ProfitCounter::new());
        let snap = session.snapshot();
        assert_eq!(snap.state, HedgeStateKind::Scanning);
        assert!(snap.open_orders.is_empty());
        assert!(snap.ledger.imbalance.is_none());
    }
}
