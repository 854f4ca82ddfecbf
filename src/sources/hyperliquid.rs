//! Hyperliquid quote source implementation

use crate::{
    constants::{
        DEFAULT_HYPERLIQUID_COINS, HYPERLIQUID_API_URL, HYPERLIQUID_QUOTE_SYMBOL,
        REQUEST_TIMEOUT_SECS, USER_AGENT,
    },
    error::QuoteError,
    metrics::{MetricsCollector, SourceMetrics},
    source::QuoteSource,
    store::PriceCache,
    types::{MarketPair, StoredPrice, Symbol},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Hyperliquid API request for info
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum HyperliquidRequest {
    AllMids,
}

/// Hyperliquid API response for allMids
/// Returns a map of coin to mid price as string
#[derive(Debug, Deserialize)]
struct AllMidsResponse(HashMap<String, String>);

/// Hyperliquid quote source
///
/// Every market is `COIN/USD`. One `allMids` request prices all configured
/// coins, so any fetch refreshes the whole cache.
pub struct HyperliquidSource {
    client: Client,
    coins: Vec<Symbol>,
    quote: Symbol,
    cache: PriceCache,
    metrics: MetricsCollector,
}

impl HyperliquidSource {
    /// Creates a new Hyperliquid source for the given coins
    pub fn new(coins: impl IntoIterator<Item = impl Into<Symbol>>) -> Result<Self, QuoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(QuoteError::Network)?;

        Ok(Self {
            client,
            coins: coins.into_iter().map(Into::into).collect(),
            quote: Symbol::new(HYPERLIQUID_QUOTE_SYMBOL),
            cache: PriceCache::new(),
            metrics: MetricsCollector::new("hyperliquid"),
        })
    }

    pub fn with_defaults() -> Result<Self, QuoteError> {
        Self::new(DEFAULT_HYPERLIQUID_COINS.iter().copied())
    }

    /// Parses the Hyperliquid response into `COIN/USD` rates
    fn parse_response(&self, response: &AllMidsResponse) -> Vec<(MarketPair, f64)> {
        self.coins
            .iter()
            .filter_map(|coin| {
                let mid = response.0.get(coin.as_str())?;
                match mid.parse::<f64>() {
                    Ok(price) => Some((MarketPair::new(coin, &self.quote), price)),
                    Err(_) => {
                        tracing::debug!(coin = %coin, mid = %mid, "Unparseable Hyperliquid mid");
                        None
                    }
                }
            })
            .collect()
    }

    async fn fetch(&self) -> Result<Vec<(MarketPair, f64)>, QuoteError> {
        let start = Instant::now();
        let result = self.request().await;
        self.metrics
            .record_request(start.elapsed(), result.is_ok())
            .await;
        let prices = result?;

        for (pair, price) in &prices {
            self.cache.record(pair, *price, self.source_name()).await;
        }
        Ok(prices)
    }

    async fn request(&self) -> Result<Vec<(MarketPair, f64)>, QuoteError> {
        tracing::debug!(url = HYPERLIQUID_API_URL, "Fetching prices from Hyperliquid");

        let response = self
            .client
            .post(HYPERLIQUID_API_URL)
            .json(&HyperliquidRequest::AllMids)
            .send()
            .await
            .map_err(QuoteError::Network)?;

        // Check for rate limiting
        if response.status().as_u16() == 429 {
            return Err(QuoteError::RateLimitExceeded);
        }

        if !response.status().is_success() {
            return Err(QuoteError::ApiError(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let response_text = response.text().await.map_err(QuoteError::Network)?;
        let mids: AllMidsResponse = serde_json::from_str(&response_text).map_err(|e| {
            QuoteError::InvalidResponse(format!(
                "Failed to parse Hyperliquid response: {}. Response: {}",
                e, response_text
            ))
        })?;

        let prices = self.parse_response(&mids);
        if prices.is_empty() {
            return Err(QuoteError::InvalidResponse(
                "No prices returned from Hyperliquid".to_string(),
            ));
        }

        tracing::debug!(count = prices.len(), "Fetched prices from Hyperliquid");
        Ok(prices)
    }

    fn is_listed(&self, pair: &MarketPair) -> bool {
        let coin = if pair.to == self.quote {
            &pair.from
        } else if pair.from == self.quote {
            &pair.to
        } else {
            return false;
        };
        self.coins.contains(coin)
    }
}

impl Default for HyperliquidSource {
    fn default() -> Self {
        Self::with_defaults().expect("Failed to create Hyperliquid source")
    }
}

#[async_trait]
impl QuoteSource for HyperliquidSource {
    async fn get_symbols(&self) -> Result<Vec<Symbol>, QuoteError> {
        let mut symbols = self.coins.clone();
        symbols.push(self.quote.clone());
        Ok(symbols)
    }

    async fn get_markets(&self) -> Result<Vec<MarketPair>, QuoteError> {
        Ok(self
            .coins
            .iter()
            .map(|coin| MarketPair::new(coin, &self.quote))
            .collect())
    }

    async fn get_base_symbols(&self) -> Result<Vec<Symbol>, QuoteError> {
        Ok(vec![self.quote.clone()])
    }

    async fn get_price(
        &self,
        pair: &MarketPair,
        value: f64,
        use_last_known: bool,
    ) -> Result<f64, QuoteError> {
        if !use_last_known {
            if !self.is_listed(pair) {
                return Err(QuoteError::unsupported(pair));
            }
            self.fetch().await?;
        }

        // the cache holds both orientations once the fetch has recorded them
        self.cache
            .get(pair)
            .await
            .map(|stored| stored.rate * value)
            .ok_or_else(|| {
                if use_last_known {
                    QuoteError::not_cached(pair)
                } else {
                    QuoteError::InvalidResponse(format!("No mid returned for {}", pair))
                }
            })
    }

    async fn get_stored_price(&self, pair: &MarketPair) -> Option<StoredPrice> {
        self.cache.get(pair).await
    }

    fn source_name(&self) -> &'static str {
        "hyperliquid"
    }

    async fn metrics(&self) -> Option<SourceMetrics> {
        Some(self.metrics.get_metrics().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_string(&HyperliquidRequest::AllMids).unwrap();
        assert_eq!(body, r#"{"type":"allMids"}"#);
    }

    #[test]
    fn test_parse_response_skips_bad_mids() {
        let source = HyperliquidSource::new(["BTC", "ETH", "SOL"]).unwrap();
        let mids: AllMidsResponse =
            serde_json::from_str(r#"{"BTC": "60000.5", "ETH": "n/a", "DOGE": "0.1"}"#).unwrap();

        let prices = source.parse_response(&mids);
        assert_eq!(prices, vec![(MarketPair::new("BTC", "USD"), 60000.5)]);
    }

    #[tokio::test]
    async fn test_listing_and_orientation() {
        let source = HyperliquidSource::new(["btc", "eth"]).unwrap();

        let markets = source.get_markets().await.unwrap();
        assert_eq!(
            markets,
            vec![MarketPair::new("BTC", "USD"), MarketPair::new("ETH", "USD")]
        );
        assert!(source.is_listed(&MarketPair::new("USD", "ETH")));
        assert!(!source.is_listed(&MarketPair::new("BTC", "ETH")));

        let err = source
            .get_price(&MarketPair::new("SOL", "USD"), 1.0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::UnsupportedMarket(_)));
    }
}
