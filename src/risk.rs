//! Risk governor: which actions are allowed given exposure and time left.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::{Display, IntoStaticStr};

/// Allowed action set for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RiskPhase {
    /// Entries and hedges allowed.
    AllowNewExposure,
    /// Only orders that reduce the imbalance.
    HedgeOnly,
    /// Unwind the imbalance now.
    ForceClose,
    /// Nothing to do until the next market.
    PauseNoImbalance,
}

impl RiskPhase {
    /// Whether a new first leg may be opened.
    pub fn allows_entry(&self) -> bool {
        matches!(self, RiskPhase::AllowNewExposure)
    }
}

/// Time and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskThresholds {
    /// Below this time-to-expiry no new first legs are opened.
    pub stop_new_trades: Duration,
    /// Below this time-to-expiry any imbalance is sold off.
    pub force_close: Duration,
    /// Largest imbalance that still permits new entries.
    pub max_imbalance: Decimal,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            stop_new_trades: Duration::from_secs(330),
            force_close: Duration::from_secs(300),
            max_imbalance: Decimal::TEN,
        }
    }
}

/// Pure mapping from `(imbalance, time_to_expiry)` to a [`RiskPhase`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskGovernor {
    thresholds: RiskThresholds,
}

impl RiskGovernor {
    /// Create a governor.
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// Configured limits.
    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// Evaluate the phase. `imbalance` is the absolute share difference.
    pub fn evaluate(&self, imbalance: Decimal, time_to_expiry: Duration) -> RiskPhase {
        let exposed = !imbalance.is_zero();

        if time_to_expiry < self.thresholds.force_close {
            return if exposed {
                RiskPhase::ForceClose
            } else {
                RiskPhase::PauseNoImbalance
            };
        }

        if time_to_expiry < self.thresholds.stop_new_trades {
            return if exposed {
                RiskPhase::HedgeOnly
            } else {
                RiskPhase::PauseNoImbalance
            };
        }

        if imbalance.abs() > self.thresholds.max_imbalance {
            return RiskPhase::HedgeOnly;
        }

        RiskPhase::AllowNewExposure
    }
}
