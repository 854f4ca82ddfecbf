//! In-memory per-pair price cache owned by quote sources

use crate::types::{MarketPair, StoredPrice};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Freshness-stamped cache of observed rates, keyed by ordered pair
///
/// Recording `A/B` also records the reciprocal for `B/A`, so a market can be
/// walked in either direction without a second quote.
#[derive(Clone, Default)]
pub struct PriceCache {
    prices: Arc<RwLock<HashMap<MarketPair, StoredPrice>>>,
}

impl PriceCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rate observed now
    pub async fn record(&self, pair: &MarketPair, rate: f64, source: &str) {
        self.record_at(pair, rate, Utc::now(), source).await;
    }

    /// Records a rate with an explicit observation time
    pub async fn record_at(
        &self,
        pair: &MarketPair,
        rate: f64,
        observed_at: DateTime<Utc>,
        source: &str,
    ) {
        let mut prices = self.prices.write().await;
        prices.insert(pair.clone(), StoredPrice::observed(rate, observed_at, source));
        if rate != 0.0 && rate.is_finite() {
            prices.insert(
                pair.inverse(),
                StoredPrice::observed(1.0 / rate, observed_at, source),
            );
        }
        tracing::debug!(pair = %pair, rate, source, "Recorded price");
    }

    /// Gets the stored rate for a pair regardless of age
    pub async fn get(&self, pair: &MarketPair) -> Option<StoredPrice> {
        self.prices.read().await.get(pair).cloned()
    }

    /// Checks if a rate exists for a pair (regardless of staleness)
    pub async fn contains(&self, pair: &MarketPair) -> bool {
        self.prices.read().await.contains_key(pair)
    }

    /// Checks if the rate for a pair is stale or missing
    pub async fn is_stale(&self, pair: &MarketPair, threshold_secs: f64) -> bool {
        match self.prices.read().await.get(pair) {
            Some(price) => price.is_stale(threshold_secs),
            None => true,
        }
    }

    /// Number of stored pairs, reciprocals included
    pub async fn len(&self) -> usize {
        self.prices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prices.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_stores_reciprocal() {
        let cache = PriceCache::new();
        let pair = MarketPair::new("XBT", "USD");
        cache.record(&pair, 40000.0, "test").await;

        assert_eq!(cache.get(&pair).await.unwrap().rate, 40000.0);
        let inverse = cache.get(&pair.inverse()).await.unwrap();
        assert!((inverse.rate - 1.0 / 40000.0).abs() < 1e-15);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_zero_rate_has_no_reciprocal() {
        let cache = PriceCache::new();
        let pair = MarketPair::new("DUST", "USD");
        cache.record(&pair, 0.0, "test").await;

        assert!(cache.contains(&pair).await);
        assert!(!cache.contains(&pair.inverse()).await);
    }

    #[tokio::test]
    async fn test_staleness() {
        let cache = PriceCache::new();
        let pair = MarketPair::new("ETH", "USD");
        assert!(cache.is_stale(&pair, 60.0).await);

        cache
            .record_at(&pair, 2000.0, Utc::now() - chrono::Duration::seconds(600), "test")
            .await;
        assert!(cache.is_stale(&pair, 60.0).await);
        assert!(!cache.is_stale(&pair, 3600.0).await);
    }
}
