//! Driver loop: rotate markets, feed fills to the ledger, tick the machine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::feed::{MarketWebSocket, QuoteFeed, ReconnectConfig};
use crate::hedger::{HedgeMachine, MarketSession, ProfitCounter};
use crate::ledger::FillNotice;
use crate::market::{Leg, Market, MarketRotator, SimulatedExchange};
use crate::metrics;

/// Delay before asking the rotator again when no market is live.
const NO_MARKET_RETRY: Duration = Duration::from_secs(5);

struct PushFeed {
    ws_url: String,
    reconnect: ReconnectConfig,
    task: Option<JoinHandle<()>>,
}

/// Runs one [`MarketSession`] at a time against whatever market the rotator
/// says is live.
pub struct Driver {
    machine: HedgeMachine,
    rotator: Box<dyn MarketRotator>,
    feed: Arc<QuoteFeed>,
    profit: ProfitCounter,
    state: AppState,
    push: Option<PushFeed>,
    paper: Option<Arc<SimulatedExchange>>,
    fills: Option<UnboundedReceiver<FillNotice>>,
    session: Option<MarketSession>,
}

impl Driver {
    /// Create a driver.
    pub fn new(
        machine: HedgeMachine,
        rotator: Box<dyn MarketRotator>,
        feed: Arc<QuoteFeed>,
        profit: ProfitCounter,
        state: AppState,
    ) -> Self {
        Self {
            machine,
            rotator,
            feed,
            profit,
            state,
            push: None,
            paper: None,
            fills: None,
            session: None,
        }
    }

    /// Subscribe to the WebSocket book feed for each market.
    pub fn with_push_feed(mut self, ws_url: String, reconnect: ReconnectConfig) -> Self {
        self.push = Some(PushFeed {
            ws_url,
            reconnect,
            task: None,
        });
        self
    }

    /// Route orders to a simulated exchange, mirroring live quotes into it.
    pub fn with_paper_exchange(mut self, exchange: Arc<SimulatedExchange>) -> Self {
        self.paper = Some(exchange);
        self
    }

    /// Drain fill notices into the ledger every tick.
    pub fn with_fill_notices(mut self, fills: UnboundedReceiver<FillNotice>) -> Self {
        self.fills = Some(fills);
        self
    }

    /// Current session, if a market is live.
    pub fn session(&self) -> Option<&MarketSession> {
        self.session.as_ref()
    }

    /// Loop until `shutdown` resolves, then cancel open orders.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Driver started");

        loop {
            let delay = self.run_cycle().await;
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Driver stopping, cancelling open orders");
        self.finish_session().await;
        if let Some(task) = self.push.as_mut().and_then(|p| p.task.take()) {
            task.abort();
        }
    }

    /// One pass: resolve the market, account fills, step the machine.
    /// Returns the delay before the next pass.
    pub async fn run_cycle(&mut self) -> Duration {
        let market = match self.rotator.current_market().await {
            Ok(market) => market,
            Err(e) => {
                warn!(error = %e, "Market lookup failed");
                None
            }
        };

        let Some(market) = market else {
            if self.session.as_ref().is_some_and(|s| s.market.is_closed()) {
                self.finish_session().await;
            }
            self.state.set_ready(false);
            return NO_MARKET_RETRY;
        };

        if self.session.as_ref().map(|s| s.market.slug != market.slug).unwrap_or(true) {
            self.rotate(market).await;
        }

        self.drain_fills();
        self.mirror_quotes();

        let Some(session) = self.session.as_mut() else {
            return NO_MARKET_RETRY;
        };
        let time_to_expiry = session.market.time_to_expiry();
        let delay = self.machine.tick(session, Instant::now(), time_to_expiry).await;

        let snapshot = session.snapshot();
        info!(
            market = %snapshot.market,
            state = %snapshot.state,
            phase = ?snapshot.phase,
            up = %snapshot.ledger.reconciled.up.shares,
            down = %snapshot.ledger.reconciled.down.shares,
            secs_left = snapshot.time_to_expiry_secs,
            profit = %snapshot.cumulative_profit,
            "Tick"
        );
        self.state.publish(Some(snapshot)).await;
        delay
    }

    async fn rotate(&mut self, market: Market) {
        self.finish_session().await;

        info!(
            slug = %market.slug,
            up = %market.up_token_id,
            down = %market.down_token_id,
            ends_in = %market.time_remaining_str(),
            "Trading market"
        );
        metrics::inc_market_rotations();

        self.feed
            .retain_tokens(&[market.token_id(Leg::Up), market.token_id(Leg::Down)]);
        if let Some(push) = self.push.as_mut() {
            if let Some(task) = push.task.take() {
                task.abort();
            }
            let ws = Arc::new(MarketWebSocket::new(push.ws_url.clone(), push.reconnect.clone()));
            push.task = Some(ws.spawn(
                self.feed.clone(),
                vec![market.up_token_id.clone(), market.down_token_id.clone()],
            ));
        }

        self.session = Some(MarketSession::new(market, self.profit.clone()));
        self.state.set_ready(true);
    }

    /// Cancel the session's orders and log its summary.
    async fn finish_session(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        drain_into(self.fills.as_mut(), &mut session);
        self.machine.cancel_all(&mut session).await;
        // Fills reported while cancelling belong to this market, not the next.
        drain_into(self.fills.as_mut(), &mut session);

        let stats = &session.stats;
        let positions = session.ledger.reconcile();
        info!(
            market = %session.market.slug,
            entries = stats.entries,
            hedges = stats.hedges,
            pairs = stats.pairs_completed,
            hedged_shares = %stats.hedged_shares,
            closes = stats.closes,
            force_closes = stats.force_closes,
            realized = %stats.realized_profit,
            up = %positions.up,
            down = %positions.down,
            cumulative = %self.profit.total(),
            "Market summary"
        );
        self.state.publish(None).await;
    }

    fn drain_fills(&mut self) {
        if let Some(session) = self.session.as_mut() {
            drain_into(self.fills.as_mut(), session);
        }
    }

    fn mirror_quotes(&self) {
        let (Some(paper), Some(session)) = (&self.paper, &self.session) else {
            return;
        };
        for leg in [Leg::Up, Leg::Down] {
            let token = session.market.token_id(leg);
            if let Some(view) = self.feed.current_quote(token) {
                paper.set_quote(token, view.quote);
            }
        }
    }
}

fn drain_into(fills: Option<&mut UnboundedReceiver<FillNotice>>, session: &mut MarketSession) {
    let Some(fills) = fills else {
        return;
    };
    while let Ok(notice) = fills.try_recv() {
        let added = session.ledger.observe_fill(&notice);
        if !added.is_zero() {
            debug!(order_id = %notice.order_id, leg = %notice.leg, %added, "Fill notice");
        }
    }
}
