//! Bounded-staleness quote cache fed by push updates with a pull fallback.

use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::types::{Quote, QuoteView};
use crate::error::FeedError;
use crate::metrics;

/// Pull source for top-of-book quotes.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch the current quote for a token.
    async fn fetch_quote(&self, token_id: &str) -> Result<Quote, FeedError>;
}

/// Latest known quote per token.
///
/// Push updates (WebSocket) land via [`QuoteFeed::update`]. Readers use
/// [`QuoteFeed::current_quote`] for a bounded local lookup, or
/// [`QuoteFeed::fresh_quote`] before a trade decision, which pulls once when
/// the cached quote is older than the staleness window.
pub struct QuoteFeed {
    quotes: DashMap<String, Quote>,
    stale_after: Duration,
    source: Arc<dyn QuoteSource>,
}

impl QuoteFeed {
    /// Create a feed with the given pull source and staleness window.
    pub fn new(source: Arc<dyn QuoteSource>, stale_after: Duration) -> Self {
        Self {
            quotes: DashMap::new(),
            stale_after,
            source,
        }
    }

    /// Staleness window.
    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Merge a pushed quote.
    pub fn update(&self, token_id: &str, quote: Quote) {
        self.quotes.insert(token_id.to_string(), quote);
    }

    /// Drop cached quotes for tokens no longer traded.
    pub fn retain_tokens(&self, token_ids: &[&str]) {
        self.quotes.retain(|token, _| token_ids.contains(&token.as_str()));
    }

    /// Cached quote with its age and stale flag.
    pub fn current_quote(&self, token_id: &str) -> Option<QuoteView> {
        let quote = *self.quotes.get(token_id)?;
        let age = quote.age_at(Instant::now());
        Some(QuoteView {
            quote,
            age,
            stale: age > self.stale_after,
        })
    }

    /// Cached quote, pulled first if missing or stale.
    ///
    /// When the pull fails the last known quote is returned with the stale
    /// flag set.
    #[instrument(skip(self), level = "debug")]
    pub async fn fresh_quote(&self, token_id: &str) -> Option<QuoteView> {
        let cached = self.current_quote(token_id);
        if matches!(cached, Some(view) if !view.stale) {
            return cached;
        }

        let start = StdInstant::now();
        match self.source.fetch_quote(token_id).await {
            Ok(quote) => {
                metrics::record_quote_fetch_latency(start);
                debug!(token_id, bid = ?quote.best_bid, ask = ?quote.best_ask, "Pulled quote");
                self.update(token_id, quote);
                self.current_quote(token_id)
            }
            Err(e) => {
                warn!(token_id, error = %e, "Quote pull failed, using last known quote");
                cached.map(|view| QuoteView { stale: true, ..view })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct ScriptedSource {
        next: Mutex<Option<Quote>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl QuoteSource for ScriptedSource {
        async fn fetch_quote(&self, token_id: &str) -> Result<Quote, FeedError> {
            *self.calls.lock().unwrap() += 1;
            let next = *self.next.lock().unwrap();
            next.ok_or_else(|| FeedError::FetchFailed {
                token_id: token_id.to_string(),
                reason: "offline".to_string(),
            })
        }
    }

    fn feed_with(next: Option<Quote>) -> (QuoteFeed, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource {
            next: Mutex::new(next),
            calls: Mutex::new(0),
        });
        let feed = QuoteFeed::new(source.clone(), Duration::from_secs(3));
        (feed, source)
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_push_quote_skips_pull() {
        let (feed, source) = feed_with(None);
        feed.update("up", Quote::two_sided(dec!(0.40), dec!(0.42), dec!(50)));

        let view = feed.fresh_quote("up").await.unwrap();
        assert!(!view.stale);
        assert_eq!(view.best_bid(), Some(dec!(0.40)));
        assert_eq!(*source.calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_quote_triggers_pull() {
        let (feed, source) = feed_with(Some(Quote::two_sided(dec!(0.45), dec!(0.47), dec!(5))));
        feed.update("up", Quote::two_sided(dec!(0.40), dec!(0.42), dec!(50)));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(feed.current_quote("up").unwrap().stale);
        let view = feed.fresh_quote("up").await.unwrap();
        assert!(!view.stale);
        assert_eq!(view.best_bid(), Some(dec!(0.45)));
        assert_eq!(*source.calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pull_returns_last_known_as_stale() {
        let (feed, _source) = feed_with(None);
        feed.update("up", Quote::two_sided(dec!(0.40), dec!(0.42), dec!(50)));
        tokio::time::advance(Duration::from_secs(5)).await;

        let view = feed.fresh_quote("up").await.unwrap();
        assert!(view.stale);
        assert_eq!(view.best_ask(), Some(dec!(0.42)));
        assert_eq!(view.crossable_ask(), None);
    }

    #[tokio::test]
    async fn unknown_token_without_source_is_none() {
        let (feed, _source) = feed_with(None);
        assert!(feed.fresh_quote("missing").await.is_none());
    }

    #[tokio::test]
    async fn retain_drops_rotated_tokens() {
        let (feed, _source) = feed_with(None);
        feed.update("old", Quote::empty());
        feed.update("new", Quote::empty());
        feed.retain_tokens(&["new"]);
        assert!(feed.current_quote("old").is_none());
        assert!(feed.current_quote("new").is_some());
    }
}
