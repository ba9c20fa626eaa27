//! Market rotation for fixed-window up/down series.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::types::{GammaMarket, Market};
use crate::config::Config;
use crate::error::MarketError;

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>.+)-(?P<ts>\d+)$").expect("valid regex")
});

/// Supplies the market that should be traded right now.
#[async_trait]
pub trait MarketRotator: Send {
    /// Currently tradable market, or `None` between windows.
    async fn current_market(&mut self) -> Result<Option<Market>, MarketError>;
}

/// Slug for the window containing `now`.
pub fn compute_slug(prefix: &str, window_secs: i64, now: i64) -> String {
    let start = now.div_euclid(window_secs) * window_secs;
    format!("{}-{}", prefix, start)
}

/// Window start encoded at the end of a slug.
pub fn slug_timestamp(slug: &str) -> Option<i64> {
    SLUG_PATTERN
        .captures(slug)
        .and_then(|c| c.name("ts"))
        .and_then(|m| m.as_str().parse().ok())
}

/// Get the next market slug based on current slug.
pub fn next_slug(slug: &str, window_secs: i64) -> Result<String, MarketError> {
    let captures = SLUG_PATTERN.captures(slug).ok_or_else(|| {
        MarketError::ParseError(format!("Slug not in expected format: {}", slug))
    })?;
    let prefix = captures.name("prefix").map(|m| m.as_str()).unwrap_or_default();
    let ts = slug_timestamp(slug)
        .ok_or_else(|| MarketError::ParseError("Failed to parse timestamp".to_string()))?;
    Ok(format!("{}-{}", prefix, ts + window_secs))
}

/// Build a [`Market`] from a Gamma markets row.
pub fn market_from_gamma(
    slug: &str,
    gamma: GammaMarket,
    window_secs: i64,
) -> Result<Market, MarketError> {
    let tokens = gamma
        .clob_token_ids
        .ok_or_else(|| MarketError::ParseError("No clobTokenIds".to_string()))?;
    let [up, down]: [String; 2] = tokens.try_into().map_err(|t: Vec<String>| {
        MarketError::ParseError(format!("Expected 2 token IDs, got {}", t.len()))
    })?;

    let start_timestamp = slug_timestamp(slug)
        .ok_or_else(|| MarketError::ParseError("Could not parse timestamp from slug".to_string()))?;
    let end_timestamp = gamma
        .end_date
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .map(|t| t.unix_timestamp())
        .unwrap_or(start_timestamp + window_secs);

    Ok(Market {
        slug: slug.to_string(),
        id: gamma.id.unwrap_or_default(),
        up_token_id: up,
        down_token_id: down,
        tick_size: gamma
            .order_price_min_tick_size
            .filter(|t| !t.is_zero())
            .unwrap_or(Market::DEFAULT_TICK),
        start_timestamp,
        end_timestamp,
        question: gamma.question,
    })
}

/// Fetch market information for a slug from the Gamma markets endpoint.
#[instrument(skip(http, gamma_url))]
pub async fn fetch_market_from_slug(
    http: &reqwest::Client,
    gamma_url: &str,
    slug: &str,
    window_secs: i64,
) -> Result<Option<Market>, MarketError> {
    let response = http
        .get(format!("{}/markets", gamma_url.trim_end_matches('/')))
        .query(&[("slug", slug)])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(MarketError::FetchFailed {
            slug: slug.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let rows: Vec<GammaMarket> = response
        .json()
        .await
        .map_err(|e| MarketError::ParseError(format!("Failed to parse Gamma response: {}", e)))?;

    let Some(row) = rows
        .into_iter()
        .find(|m| m.slug.as_deref().map_or(true, |s| s == slug))
    else {
        debug!(slug, "Slug not listed");
        return Ok(None);
    };

    if row.closed == Some(true) {
        return Err(MarketError::MarketClosed {
            slug: slug.to_string(),
        });
    }
    market_from_gamma(slug, row, window_secs).map(Some)
}

/// Rotator that derives the current slug from the clock.
pub struct SlugRotator {
    http: reqwest::Client,
    gamma_url: String,
    prefix: String,
    window_secs: i64,
    override_slug: Option<String>,
    current: Option<Market>,
}

impl SlugRotator {
    /// Create a rotator from config.
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            gamma_url: config.polymarket_gamma_url.clone(),
            prefix: config.market_slug_prefix.clone(),
            window_secs: config.market_window_seconds,
            override_slug: config.polymarket_market_slug.clone(),
            current: None,
        }
    }

    /// Slug that should be live at `now`.
    pub fn target_slug(&self, now: i64) -> Result<String, MarketError> {
        match (&self.override_slug, &self.current) {
            // Pinned slug first, then follow its series once it expires.
            (Some(pinned), None) => Ok(pinned.clone()),
            (Some(_), Some(current)) if !current.is_closed_at(now) => Ok(current.slug.clone()),
            (Some(_), Some(current)) => next_slug(&current.slug, self.window_secs),
            (None, _) => Ok(compute_slug(&self.prefix, self.window_secs, now)),
        }
    }
}

#[async_trait]
impl MarketRotator for SlugRotator {
    async fn current_market(&mut self) -> Result<Option<Market>, MarketError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let slug = self.target_slug(now)?;

        if let Some(current) = &self.current {
            if current.slug == slug && !current.is_closed_at(now) {
                return Ok(Some(current.clone()));
            }
        }

        let market =
            fetch_market_from_slug(&self.http, &self.gamma_url, &slug, self.window_secs).await?;
        match &market {
            Some(m) if !m.is_closed_at(now) => {
                info!(slug = %m.slug, ends_in = %m.time_remaining_str(), "Active market");
                self.current = Some(m.clone());
                Ok(market)
            }
            _ => Ok(None),
        }
    }
}
