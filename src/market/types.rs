//! Market-related types for rotating binary prediction markets.

use std::ops::{Index, IndexMut};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};
use time::OffsetDateTime;

/// One of the two complementary outcome tokens of a binary market.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// First outcome token (UP / YES).
    #[strum(serialize = "up", serialize = "yes", serialize = "UP", serialize = "YES")]
    #[default]
    Up,
    /// Second outcome token (DOWN / NO).
    #[strum(serialize = "down", serialize = "no", serialize = "DOWN", serialize = "NO")]
    Down,
}

impl Leg {
    /// Both legs, in a fixed order.
    pub const BOTH: [Leg; 2] = [Leg::Up, Leg::Down];

    /// Get the opposite leg.
    pub fn opposite(&self) -> Self {
        match self {
            Leg::Up => Leg::Down,
            Leg::Down => Leg::Up,
        }
    }
}

/// A value tracked separately for each leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegPair<T> {
    /// Value for [`Leg::Up`].
    pub up: T,
    /// Value for [`Leg::Down`].
    pub down: T,
}

impl<T> LegPair<T> {
    /// Create a pair from both values.
    pub fn new(up: T, down: T) -> Self {
        Self { up, down }
    }

    /// Map both values.
    pub fn map<U>(self, mut f: impl FnMut(Leg, T) -> U) -> LegPair<U> {
        LegPair {
            up: f(Leg::Up, self.up),
            down: f(Leg::Down, self.down),
        }
    }
}

impl<T> Index<Leg> for LegPair<T> {
    type Output = T;

    fn index(&self, leg: Leg) -> &T {
        match leg {
            Leg::Up => &self.up,
            Leg::Down => &self.down,
        }
    }
}

impl<T> IndexMut<Leg> for LegPair<T> {
    fn index_mut(&mut self, leg: Leg) -> &mut T {
        match leg {
            Leg::Up => &mut self.up,
            Leg::Down => &mut self.down,
        }
    }
}

/// A tradable market window. Immutable for the life of one trading cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Market {
    /// Market slug (e.g., "btc-updown-15m-1765301400").
    pub slug: String,
    /// Unique market identifier.
    pub id: String,
    /// UP (YES) token ID for CLOB.
    pub up_token_id: String,
    /// DOWN (NO) token ID for CLOB.
    pub down_token_id: String,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Unix timestamp when the window opened.
    pub start_timestamp: i64,
    /// Unix timestamp when the market expires.
    pub end_timestamp: i64,
    /// Market question text.
    pub question: Option<String>,
}

impl Market {
    /// Tick size used when the venue does not report one.
    pub const DEFAULT_TICK: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    /// Get the token ID for a given leg.
    pub fn token_id(&self, leg: Leg) -> &str {
        match leg {
            Leg::Up => &self.up_token_id,
            Leg::Down => &self.down_token_id,
        }
    }

    /// Find which leg a token ID belongs to.
    pub fn leg_for_token(&self, token_id: &str) -> Option<Leg> {
        if token_id == self.up_token_id {
            Some(Leg::Up)
        } else if token_id == self.down_token_id {
            Some(Leg::Down)
        } else {
            None
        }
    }

    /// Check if the market is closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Check if the market is closed at the given unix time.
    pub fn is_closed_at(&self, now_unix: i64) -> bool {
        now_unix >= self.end_timestamp
    }

    /// Time left until expiry, saturating at zero.
    pub fn time_to_expiry(&self) -> Duration {
        self.time_to_expiry_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Time left until expiry at the given unix time, saturating at zero.
    pub fn time_to_expiry_at(&self, now_unix: i64) -> Duration {
        let remaining = self.end_timestamp - now_unix;
        Duration::from_secs(remaining.max(0) as u64)
    }

    /// Format remaining time as "Xm Ys" string.
    pub fn time_remaining_str(&self) -> String {
        let secs = self.time_to_expiry().as_secs();
        if secs == 0 {
            return "CLOSED".to_string();
        }
        format!("{}m {}s", secs / 60, secs % 60)
    }

    /// Round a price down onto the tick grid.
    pub fn floor_to_tick(&self, price: Decimal) -> Decimal {
        if self.tick_size.is_zero() {
            return price;
        }
        (price / self.tick_size).floor() * self.tick_size
    }
}

/// Market info from the Gamma markets endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    /// Market slug.
    pub slug: Option<String>,
    /// Market ID.
    pub id: Option<String>,
    /// Market question.
    pub question: Option<String>,
    /// CLOB token IDs; the endpoint sends these as a JSON-encoded string.
    #[serde(default, deserialize_with = "string_or_list")]
    pub clob_token_ids: Option<Vec<String>>,
    /// End date (RFC 3339).
    pub end_date: Option<String>,
    /// Minimum tick size.
    pub order_price_min_tick_size: Option<Decimal>,
    /// Whether market is closed.
    pub closed: Option<bool>,
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Encoded(String),
        List(Vec<String>),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::List(list)) => Ok(Some(list)),
        Some(Raw::Encoded(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
