//! Position types and the remote position source.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradingError;
use crate::gateway::Side;
use crate::market::Leg;

/// Share count and average cost for one leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    /// Number of shares owned.
    pub shares: Decimal,
    /// Average entry price.
    pub avg_cost: Decimal,
}

impl Position {
    /// Create a position.
    pub fn new(shares: Decimal, avg_cost: Decimal) -> Self {
        Self { shares, avg_cost }
    }

    /// Calculate the cost basis.
    pub fn cost_basis(&self) -> Decimal {
        self.shares * self.avg_cost
    }
}

/// Optimistic local position: shares plus the cost recorded at fill time.
///
/// Shares learned about without a price are counted in `unpriced` and kept
/// out of the average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalPosition {
    /// Shares believed held.
    pub shares: Decimal,
    /// Total cost paid for the priced shares.
    pub cost: Decimal,
    /// Shares held at an unknown cost.
    pub unpriced: Decimal,
}

impl LocalPosition {
    /// Average cost of the priced shares, if any.
    pub fn avg_cost(&self) -> Option<Decimal> {
        let priced = self.shares - self.unpriced;
        if priced > Decimal::ZERO {
            Some(self.cost / priced)
        } else {
            None
        }
    }

    /// Add bought shares.
    pub fn buy(&mut self, shares: Decimal, price: Decimal) {
        self.shares += shares;
        self.cost += shares * price;
    }

    /// Add shares whose cost is not known.
    pub fn buy_unpriced(&mut self, shares: Decimal) {
        self.shares += shares;
        self.unpriced += shares;
    }

    /// Remove sold shares at average cost; returns shares actually removed.
    pub fn sell(&mut self, shares: Decimal) -> Decimal {
        let removed = shares.min(self.shares);
        if removed <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let unpriced_removed = self.unpriced * removed / self.shares;
        if let Some(avg) = self.avg_cost() {
            self.cost -= (removed - unpriced_removed) * avg;
        }
        self.unpriced -= unpriced_removed;
        self.shares -= removed;
        if self.shares.is_zero() {
            self.cost = Decimal::ZERO;
            self.unpriced = Decimal::ZERO;
        }
        removed
    }
}

/// A fill observed on any channel.
///
/// `cumulative_filled` is the order's total filled size so far, which lets
/// the ledger count the same fill once however many channels report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillNotice {
    /// Remote order id.
    pub order_id: String,
    /// Leg traded.
    pub leg: Leg,
    /// Side traded.
    pub side: Side,
    /// Total filled size of the order so far.
    pub cumulative_filled: Decimal,
    /// Fill price.
    pub price: Decimal,
}

/// One entry from the authoritative position endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePosition {
    /// Outcome token id.
    pub token_id: String,
    /// Shares held.
    pub shares: Decimal,
    /// Average cost, when the source reports a usable one.
    pub avg_cost: Option<Decimal>,
}

/// Authoritative, higher-latency position store.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// All positions held by the account.
    async fn positions(&self) -> Result<Vec<RemotePosition>, TradingError>;
}

/// Position row as returned by the data API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPosition {
    /// Token ID.
    #[serde(alias = "asset_id", alias = "token_id")]
    pub asset: Option<String>,
    /// Position size.
    pub size: Option<Decimal>,
    /// Average entry price.
    #[serde(alias = "avg_price")]
    pub avg_price: Option<Decimal>,
}

impl ApiPosition {
    /// Convert to a remote position, skipping incomplete rows.
    pub fn to_remote(&self) -> Option<RemotePosition> {
        Some(RemotePosition {
            token_id: self.asset.clone()?,
            shares: self.size?,
            avg_cost: self.avg_price.filter(|p| *p > Decimal::ZERO),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn local_position_tracks_cost() {
        let mut pos = LocalPosition::default();
        pos.buy(dec!(10), dec!(0.40));
        pos.buy(dec!(10), dec!(0.50));
        assert_eq!(pos.avg_cost(), Some(dec!(0.45)));

        assert_eq!(pos.sell(dec!(5)), dec!(5));
        assert_eq!(pos.shares, dec!(15));
        assert_eq!(pos.avg_cost(), Some(dec!(0.45)));

        assert_eq!(pos.sell(dec!(50)), dec!(15));
        assert_eq!(pos, LocalPosition::default());
        assert_eq!(pos.avg_cost(), None);
    }

    #[test]
    fn position_cost_basis() {
        assert_eq!(Position::new(dec!(10), dec!(0.48)).cost_basis(), dec!(4.8));
    }

    #[test]
    fn api_position_parses_numbers_and_strings() {
        let json = serde_json::json!([
            {"asset": "up", "size": 12.5, "avgPrice": 0.41},
            {"asset_id": "down", "size": "3", "avg_price": "0.55"},
            {"size": 1}
        ]);
        let rows: Vec<ApiPosition> = serde_json::from_value(json).unwrap();
        let remote: Vec<_> = rows.iter().filter_map(ApiPosition::to_remote).collect();

        assert_eq!(remote.len(), 2);
        assert_eq!(remote[0].shares, dec!(12.5));
        assert_eq!(remote[1].token_id, "down");
        assert_eq!(remote[1].avg_cost, Some(dec!(0.55)));
    }

    #[test]
    fn missing_or_zero_average_is_unknown() {
        let json = serde_json::json!([
            {"asset": "up", "size": 10},
            {"asset": "down", "size": 4, "avgPrice": 0}
        ]);
        let rows: Vec<ApiPosition> = serde_json::from_value(json).unwrap();
        let remote: Vec<_> = rows.iter().filter_map(ApiPosition::to_remote).collect();

        assert_eq!(remote.len(), 2);
        assert_eq!(remote[0].avg_cost, None);
        assert_eq!(remote[1].avg_cost, None);
    }

    #[test]
    fn unpriced_shares_stay_out_of_the_average() {
        let mut pos = LocalPosition::default();
        pos.buy_unpriced(dec!(10));
        assert_eq!(pos.avg_cost(), None);

        pos.buy(dec!(10), dec!(0.40));
        assert_eq!(pos.shares, dec!(20));
        assert_eq!(pos.avg_cost(), Some(dec!(0.40)));

        assert_eq!(pos.sell(dec!(10)), dec!(10));
        assert_eq!(pos.unpriced, dec!(5));
        assert_eq!(pos.avg_cost(), Some(dec!(0.40)));
    }
}
