//! Top-of-book quote types.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::Instant;

/// Best bid / best ask for one outcome token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    /// Best bid price.
    pub best_bid: Option<Decimal>,
    /// Best ask price.
    pub best_ask: Option<Decimal>,
    /// Size resting at the best bid.
    pub bid_size: Decimal,
    /// Size resting at the best ask.
    pub ask_size: Decimal,
    /// When this quote was captured.
    pub captured_at: Instant,
}

impl Quote {
    /// Create a quote captured now.
    pub fn new(
        best_bid: Option<Decimal>,
        best_ask: Option<Decimal>,
        bid_size: Decimal,
        ask_size: Decimal,
    ) -> Self {
        Self {
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            captured_at: Instant::now(),
        }
    }

    /// Quote with no levels on either side.
    pub fn empty() -> Self {
        Self::new(None, None, Decimal::ZERO, Decimal::ZERO)
    }

    /// Shorthand for a two-sided quote with sizes on both sides.
    pub fn two_sided(bid: Decimal, ask: Decimal, size: Decimal) -> Self {
        Self::new(Some(bid), Some(ask), size, size)
    }

    /// Both sides present with non-zero size.
    pub fn has_liquidity(&self) -> bool {
        self.best_bid.is_some()
            && self.best_ask.is_some()
            && self.bid_size > Decimal::ZERO
            && self.ask_size > Decimal::ZERO
    }

    /// Get the spread between best bid and ask.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Check if the book is inverted (best_ask < best_bid).
    pub fn is_inverted(&self) -> bool {
        matches!(self.spread(), Some(s) if s < Decimal::ZERO)
    }

    /// Age of the quote at `now`.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

/// Quote as seen by a reader, with its age and staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteView {
    /// The cached quote.
    pub quote: Quote,
    /// Time since capture.
    pub age: Duration,
    /// Older than the staleness window.
    pub stale: bool,
}

impl QuoteView {
    /// Best bid price.
    pub fn best_bid(&self) -> Option<Decimal> {
        self.quote.best_bid
    }

    /// Best ask price.
    pub fn best_ask(&self) -> Option<Decimal> {
        self.quote.best_ask
    }

    /// Best ask, only if fresh enough to cross against.
    pub fn crossable_ask(&self) -> Option<Decimal> {
        if self.stale {
            None
        } else {
            self.quote.best_ask
        }
    }

    /// Best bid, only if fresh enough to cross against.
    pub fn crossable_bid(&self) -> Option<Decimal> {
        if self.stale {
            None
        } else {
            self.quote.best_bid
        }
    }
}

/// Serializable quote for status output.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteSnapshot {
    /// Best bid price.
    pub best_bid: Option<Decimal>,
    /// Best ask price.
    pub best_ask: Option<Decimal>,
    /// Age in milliseconds.
    pub age_ms: u64,
    /// Stale flag.
    pub stale: bool,
}

impl From<&QuoteView> for QuoteSnapshot {
    fn from(view: &QuoteView) -> Self {
        Self {
            best_bid: view.quote.best_bid,
            best_ask: view.quote.best_ask,
            age_ms: view.age.as_millis() as u64,
            stale: view.stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quote_liquidity_requires_both_sides() {
        assert!(Quote::two_sided(dec!(0.48), dec!(0.50), dec!(100)).has_liquidity());

        let one_sided = Quote::new(Some(dec!(0.48)), None, dec!(100), Decimal::ZERO);
        assert!(!one_sided.has_liquidity());

        let zero_size = Quote::new(Some(dec!(0.48)), Some(dec!(0.50)), dec!(100), Decimal::ZERO);
        assert!(!zero_size.has_liquidity());
    }

    #[test]
    fn quote_spread_and_inversion() {
        let quote = Quote::two_sided(dec!(0.48), dec!(0.50), dec!(10));
        assert_eq!(quote.spread(), Some(dec!(0.02)));
        assert!(!quote.is_inverted());
        assert!(Quote::two_sided(dec!(0.52), dec!(0.50), dec!(10)).is_inverted());
    }

    #[test]
    fn stale_view_hides_crossable_prices() {
        let quote = Quote::two_sided(dec!(0.48), dec!(0.50), dec!(10));
        let view = QuoteView {
            quote,
            age: Duration::from_secs(10),
            stale: true,
        };
        assert_eq!(view.crossable_ask(), None);
        assert_eq!(view.best_ask(), Some(dec!(0.50)));
    }
}
