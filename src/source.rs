//! Quote source abstraction for the external collaborators that supply raw prices

use crate::{
    error::QuoteError,
    metrics::SourceMetrics,
    types::{MarketPair, StoredPrice, Symbol},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for quote sources
///
/// A source knows a set of symbols and the markets between them, and can
/// price any of its markets in either direction. Observed rates are kept in
/// the source's own cache, which the price network only reads.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Symbols this source can quote
    async fn get_symbols(&self) -> Result<Vec<Symbol>, QuoteError>;

    /// Markets this source can quote directly
    async fn get_markets(&self) -> Result<Vec<MarketPair>, QuoteError>;

    /// Symbols used as the quote side when probing basket markets
    async fn get_base_symbols(&self) -> Result<Vec<Symbol>, QuoteError>;

    /// Prices `value` units of `pair.from` in `pair.to`
    ///
    /// With `use_last_known` the stored rate is used regardless of age, and
    /// the call fails with [`QuoteError::NotCached`] if there is none.
    /// Otherwise a fresh quote is fetched and recorded.
    async fn get_price(
        &self,
        pair: &MarketPair,
        value: f64,
        use_last_known: bool,
    ) -> Result<f64, QuoteError>;

    /// Stored rate for a pair, regardless of age
    async fn get_stored_price(&self, pair: &MarketPair) -> Option<StoredPrice>;

    /// Returns the name of this source
    fn source_name(&self) -> &'static str;

    async fn has_stored_price(&self, pair: &MarketPair) -> bool {
        self.get_stored_price(pair).await.is_some()
    }

    async fn get_stored_price_time(&self, pair: &MarketPair) -> Option<DateTime<Utc>> {
        self.get_stored_price(pair).await.map(|p| p.observed_at)
    }

    /// Request metrics, for sources that collect them
    async fn metrics(&self) -> Option<SourceMetrics> {
        None
    }
}
