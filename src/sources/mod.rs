//! Quote source implementations

pub mod aggregate;
pub mod coingecko;
pub mod hyperliquid;

pub use aggregate::SourceSet;
pub use coingecko::CoinGeckoSource;
pub use hyperliquid::HyperliquidSource;

use crate::{constants::SOURCE_ENV, error::QuoteError, source::QuoteSource};
use std::sync::Arc;

/// Quote source named by the `PRICE_NETWORK_SOURCE` environment variable
///
/// "coingecko" or "hyperliquid" select a single source; anything else gives
/// a failover set of Hyperliquid (primary) then CoinGecko.
pub fn from_env() -> Result<Arc<dyn QuoteSource>, QuoteError> {
    let name = std::env::var(SOURCE_ENV).unwrap_or_else(|_| "failover".to_string());

    let source: Arc<dyn QuoteSource> = match name.to_lowercase().as_str() {
        "hyperliquid" => Arc::new(HyperliquidSource::with_defaults()?),
        "coingecko" => Arc::new(CoinGeckoSource::with_defaults()?),
        _ => Arc::new(SourceSet::new(vec![
            Arc::new(HyperliquidSource::with_defaults()?),
            Arc::new(CoinGeckoSource::with_defaults()?),
        ])),
    };
    tracing::info!(source = source.source_name(), "Using quote source");

    Ok(source)
}
