//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::hedger::{ProfitCounter, SessionSnapshot};

/// State shared between the driver and the handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    ready: Arc<AtomicBool>,
    session: Arc<RwLock<Option<SessionSnapshot>>>,
    profit: ProfitCounter,
}

impl AppState {
    /// Create state around the shared profit counter.
    pub fn new(profit: ProfitCounter) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            session: Arc::new(RwLock::new(None)),
            profit,
        }
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Replace the published session view.
    pub async fn publish(&self, snapshot: Option<SessionSnapshot>) {
        *self.session.write().await = snapshot;
    }

    /// Last published session view.
    pub async fn session(&self) -> Option<SessionSnapshot> {
        self.session.read().await.clone()
    }

    /// Profit across all markets.
    pub fn cumulative_profit(&self) -> Decimal {
        self.profit.total()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ProfitCounter::new())
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether a market is being traded.
    pub ready: bool,
    /// Current market slug if available.
    pub market: Option<String>,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service status.
    pub status: &'static str,
    /// Active session, if any.
    pub session: Option<SessionSnapshot>,
    /// Locked-in profit across all markets.
    pub cumulative_profit: Decimal,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 if ready, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let market = state.session().await.map(|s| s.market);

    let response = ReadyResponse {
        ready: is_ready,
        market,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - the same snapshot the driver logs each tick.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.is_ready() { "running" } else { "waiting_for_market" };

    Json(StatusResponse {
        status,
        session: state.session().await,
        cumulative_profit: state.cumulative_profit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hedger::MarketSession;
    use crate::market::SimulatedExchange;

    #[test]
    fn app_state_ready_toggle() {
        let state = AppState::default();
        assert!(!state.is_ready());

        state.set_ready(true);
        assert!(state.is_ready());

        state.set_ready(false);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn published_snapshot_is_readable() {
        let state = AppState::default();
        assert!(state.session().await.is_none());

        let session = MarketSession::new(SimulatedExchange::sample_market(), ProfitCounter::new());
        state.publish(Some(session.snapshot())).await;

        let snap = state.session().await.unwrap();
        assert_eq!(snap.market, session.market.slug);
    }
}
