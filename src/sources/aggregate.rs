//! Failover quote source over several sources

use crate::{
    error::QuoteError,
    source::QuoteSource,
    types::{MarketPair, StoredPrice, Symbol},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Quote source that merges several sources and fails over between them
///
/// Listings are de-duplicated unions. A fresh price is asked of each source
/// that lists the market (in either orientation), in order, until one
/// succeeds.
pub struct SourceSet {
    sources: Vec<Arc<dyn QuoteSource>>,
}

impl SourceSet {
    /// Creates a new source set; sources are tried in the order given
    pub fn new(sources: Vec<Arc<dyn QuoteSource>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Merges one listing per source, skipping sources that failed
///
/// Fails only when every source failed.
fn merge<T: PartialEq>(
    what: &str,
    listings: Vec<(&'static str, Result<Vec<T>, QuoteError>)>,
) -> Result<Vec<T>, QuoteError> {
    let mut merged = Vec::new();
    let mut last_error = None;
    let mut any_ok = false;

    for (source, listing) in listings {
        match listing {
            Ok(items) => {
                any_ok = true;
                for item in items {
                    if !merged.contains(&item) {
                        merged.push(item);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(source, error = %e, "Source failed to list {}", what);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !any_ok => Err(e),
        _ => Ok(merged),
    }
}

#[async_trait]
impl QuoteSource for SourceSet {
    async fn get_symbols(&self) -> Result<Vec<Symbol>, QuoteError> {
        let mut listings = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            listings.push((source.source_name(), source.get_symbols().await));
        }
        merge("symbols", listings)
    }

    async fn get_markets(&self) -> Result<Vec<MarketPair>, QuoteError> {
        let mut listings = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            listings.push((source.source_name(), source.get_markets().await));
        }
        merge("markets", listings)
    }

    async fn get_base_symbols(&self) -> Result<Vec<Symbol>, QuoteError> {
        let mut listings = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            listings.push((source.source_name(), source.get_base_symbols().await));
        }
        merge("base symbols", listings)
    }

    async fn get_price(
        &self,
        pair: &MarketPair,
        value: f64,
        use_last_known: bool,
    ) -> Result<f64, QuoteError> {
        if use_last_known {
            return self
                .get_stored_price(pair)
                .await
                .map(|stored| stored.rate * value)
                .ok_or_else(|| QuoteError::not_cached(pair));
        }

        let inverse = pair.inverse();
        let mut last_error = None;

        for source in &self.sources {
            let markets = match source.get_markets().await {
                Ok(markets) => markets,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };
            if !markets.iter().any(|m| *m == *pair || *m == inverse) {
                continue;
            }

            match source.get_price(pair, value, false).await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    tracing::warn!(
                        source = source.source_name(),
                        pair = %pair,
                        error = %e,
                        "Source failed to price market"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| QuoteError::unsupported(pair)))
    }

    /// Newest stored rate among all sources
    async fn get_stored_price(&self, pair: &MarketPair) -> Option<StoredPrice> {
        let mut newest: Option<StoredPrice> = None;
        for source in &self.sources {
            if let Some(stored) = source.get_stored_price(pair).await {
                if newest
                    .as_ref()
                    .map_or(true, |n| stored.observed_at > n.observed_at)
                {
                    newest = Some(stored);
                }
            }
        }
        newest
    }

    fn source_name(&self) -> &'static str {
        "failover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;

    fn set(sources: Vec<Arc<MockSource>>) -> SourceSet {
        SourceSet::new(
            sources
                .into_iter()
                .map(|s| s as Arc<dyn QuoteSource>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_listings_are_deduplicated_unions() {
        let a = Arc::new(MockSource::new());
        a.set_market("BTC", "USD", 100.0);
        a.set_base("USD");
        let b = Arc::new(MockSource::new());
        b.set_market("BTC", "USD", 101.0);
        b.set_market("ETH", "USD", 10.0);
        b.set_base("USD");
        let sources = set(vec![a, b]);

        assert_eq!(
            sources.get_markets().await.unwrap(),
            vec![MarketPair::new("BTC", "USD"), MarketPair::new("ETH", "USD")]
        );
        assert_eq!(sources.get_symbols().await.unwrap().len(), 3);
        assert_eq!(sources.get_base_symbols().await.unwrap(), vec![Symbol::new("USD")]);
    }

    #[tokio::test]
    async fn test_fails_over_to_next_listing_source() {
        let a = Arc::new(MockSource::new());
        a.set_error("BTC", "USD", "down");
        let b = Arc::new(MockSource::new());
        b.set_market("BTC", "USD", 101.0);
        let sources = set(vec![a.clone(), b.clone()]);

        let price = sources
            .get_price(&MarketPair::new("USD", "BTC"), 101.0, false)
            .await
            .unwrap();
        assert!((price - 1.0).abs() < 1e-12);
        assert_eq!(a.total_quotes(), 1);
        assert_eq!(b.total_quotes(), 1);
    }

    #[tokio::test]
    async fn test_unlisted_market_skips_sources() {
        let a = Arc::new(MockSource::new());
        a.set_market("BTC", "USD", 100.0);
        let sources = set(vec![a.clone()]);

        let err = sources
            .get_price(&MarketPair::new("ETH", "USD"), 1.0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::UnsupportedMarket(_)));
        assert_eq!(a.total_quotes(), 0);
    }

    #[tokio::test]
    async fn test_stored_price_is_newest() {
        let a = Arc::new(MockSource::new());
        a.store_price("BTC", "USD", 90.0, 600).await;
        let b = Arc::new(MockSource::new());
        b.store_price("BTC", "USD", 100.0, 10).await;
        let sources = set(vec![a, b]);
        let pair = MarketPair::new("BTC", "USD");

        assert_eq!(sources.get_stored_price(&pair).await.unwrap().rate, 100.0);
        assert_eq!(sources.get_price(&pair, 2.0, true).await.unwrap(), 200.0);
        let err = sources
            .get_price(&MarketPair::new("ETH", "USD"), 1.0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::NotCached(_)));
    }
}
