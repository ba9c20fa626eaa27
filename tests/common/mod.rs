//! Shared harness: one machine and session over a simulated exchange.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use polymarket_hedge::config::StrategyParams;
use polymarket_hedge::feed::{Quote, QuoteFeed};
use polymarket_hedge::gateway::{GatewaySettings, OrderGateway, OrderHandle};
use polymarket_hedge::hedger::{HedgeMachine, HedgeState, MarketSession, ProfitCounter};
use polymarket_hedge::market::{Leg, Market, SimulatedExchange};
use polymarket_hedge::risk::{RiskGovernor, RiskThresholds};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;

pub const PLENTY: Duration = Duration::from_secs(600);

pub fn machine(sim: &Arc<SimulatedExchange>, feed: &Arc<QuoteFeed>) -> HedgeMachine {
    HedgeMachine::new(
        OrderGateway::new(sim.clone(), GatewaySettings::default()),
        feed.clone(),
        sim.clone(),
        RiskGovernor::new(RiskThresholds::default()),
        StrategyParams::default(),
    )
}

pub struct Harness {
    pub sim: Arc<SimulatedExchange>,
    pub feed: Arc<QuoteFeed>,
    pub machine: HedgeMachine,
    pub session: MarketSession,
    pub profit: ProfitCounter,
    pub start: Instant,
}

impl Harness {
    pub fn new() -> Self {
        let sim = Arc::new(SimulatedExchange::new());
        let feed = Arc::new(QuoteFeed::new(sim.clone(), Duration::from_secs(5)));
        let profit = ProfitCounter::new();
        Self {
            machine: machine(&sim, &feed),
            session: MarketSession::new(SimulatedExchange::sample_market(), profit.clone()),
            sim,
            feed,
            profit,
            start: Instant::now(),
        }
    }

    pub fn market(&self) -> &Market {
        &self.session.market
    }

    pub fn token(&self, leg: Leg) -> String {
        self.session.market.token_id(leg).to_string()
    }

    /// Set a quote on both the exchange and the feed.
    pub fn quote(&self, leg: Leg, bid: Decimal, ask: Decimal) {
        self.set_quote(leg, Quote::two_sided(bid, ask, dec!(100)));
    }

    pub fn set_quote(&self, leg: Leg, quote: Quote) {
        let token = self.token(leg);
        self.sim.set_quote(&token, quote);
        self.feed.update(&token, quote);
    }

    /// Seed a holding the exchange already reports.
    pub fn hold(&self, leg: Leg, shares: Decimal, avg: Decimal) {
        let token = self.token(leg);
        self.sim.set_holding(&token, shares, avg);
    }

    /// Tick at `offset` after the harness started with `time_to_expiry` left.
    pub async fn tick_at(&mut self, offset: Duration, time_to_expiry: Duration) {
        let now = self.start + offset;
        self.machine
            .tick(&mut self.session, now, time_to_expiry)
            .await;
    }

    pub async fn tick(&mut self, time_to_expiry: Duration) {
        self.tick_at(Duration::ZERO, time_to_expiry).await;
    }

    pub fn open_orders(&self) -> Vec<OrderHandle> {
        self.session.state.open_orders().into_iter().cloned().collect()
    }

    pub fn shares(&self, leg: Leg) -> Decimal {
        self.session.ledger.reconciled_shares(leg)
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.session.state, HedgeState::Scanning)
    }
}
