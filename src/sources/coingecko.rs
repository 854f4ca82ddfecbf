//! CoinGecko quote source implementation

use crate::{
    constants::{
        COINGECKO_API_URL, COINGECKO_SIMPLE_PRICE_ENDPOINT, DEFAULT_COINGECKO_COINS,
        DEFAULT_VS_CURRENCIES, REQUEST_TIMEOUT_SECS, USER_AGENT,
    },
    error::QuoteError,
    metrics::{MetricsCollector, SourceMetrics},
    source::QuoteSource,
    store::PriceCache,
    types::{MarketPair, StoredPrice, Symbol},
};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// CoinGecko API response for simple price queries: id -> currency -> price
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

/// CoinGecko quote source
///
/// Quotes every configured coin against every configured vs-currency.
/// A fetch for one coin records all of its vs-currency rates at once.
pub struct CoinGeckoSource {
    client: Client,
    /// Coin symbol -> CoinGecko id
    coins: BTreeMap<Symbol, String>,
    vs_currencies: Vec<Symbol>,
    cache: PriceCache,
    metrics: MetricsCollector,
}

impl CoinGeckoSource {
    /// Creates a new CoinGecko source
    pub fn new<S, I>(
        coins: impl IntoIterator<Item = (S, I)>,
        vs_currencies: impl IntoIterator<Item = S>,
    ) -> Result<Self, QuoteError>
    where
        S: Into<Symbol>,
        I: Into<String>,
    {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(QuoteError::Network)?;

        let mut vs: Vec<Symbol> = Vec::new();
        for symbol in vs_currencies {
            let symbol = symbol.into();
            if !vs.contains(&symbol) {
                vs.push(symbol);
            }
        }

        Ok(Self {
            client,
            coins: coins
                .into_iter()
                .map(|(symbol, id)| (symbol.into(), id.into()))
                .collect(),
            vs_currencies: vs,
            cache: PriceCache::new(),
            metrics: MetricsCollector::new("coingecko"),
        })
    }

    /// Source for the default coins and vs-currencies
    pub fn with_defaults() -> Result<Self, QuoteError> {
        Self::new(
            DEFAULT_COINGECKO_COINS.iter().copied(),
            DEFAULT_VS_CURRENCIES.iter().copied(),
        )
    }

    /// Fetches every configured market in one request, returning the count recorded
    pub async fn refresh_all(&self) -> Result<usize, QuoteError> {
        let coins: Vec<&Symbol> = self.coins.keys().collect();
        let recorded = self.fetch(&coins).await?;
        Ok(recorded.len())
    }

    /// Builds the CoinGecko API URL for fetching prices
    fn build_url(&self, coins: &[&Symbol]) -> String {
        let ids = coins
            .iter()
            .filter_map(|symbol| self.coins.get(*symbol))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let vs = self
            .vs_currencies
            .iter()
            .map(|s| s.as_str().to_lowercase())
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "{}{}?ids={}&vs_currencies={}",
            COINGECKO_API_URL, COINGECKO_SIMPLE_PRICE_ENDPOINT, ids, vs
        )
    }

    /// Parses the CoinGecko response into direct market rates
    fn parse_response(
        &self,
        response: &SimplePriceResponse,
        coins: &[&Symbol],
    ) -> Vec<(MarketPair, f64)> {
        let mut result = Vec::new();

        for coin in coins {
            let Some(quotes) = self.coins.get(*coin).and_then(|id| response.get(id)) else {
                continue;
            };
            for vs in &self.vs_currencies {
                if vs == *coin {
                    continue;
                }
                if let Some(price) = quotes.get(&vs.as_str().to_lowercase()) {
                    result.push((MarketPair::new(*coin, vs), *price));
                }
            }
        }

        result
    }

    /// Requests prices for `coins` and records them in the cache
    async fn fetch(&self, coins: &[&Symbol]) -> Result<Vec<(MarketPair, f64)>, QuoteError> {
        let start = Instant::now();
        let result = self.request(coins).await;
        self.metrics
            .record_request(start.elapsed(), result.is_ok())
            .await;
        let prices = result?;

        for (pair, price) in &prices {
            self.cache.record(pair, *price, self.source_name()).await;
        }
        Ok(prices)
    }

    async fn request(&self, coins: &[&Symbol]) -> Result<Vec<(MarketPair, f64)>, QuoteError> {
        let url = self.build_url(coins);
        tracing::debug!(url = %url, "Fetching prices from CoinGecko");

        let response = self
            .client
            .get(&url)
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
        let parsed: SimplePriceResponse = serde_json::from_str(&response_text).map_err(|e| {
            QuoteError::InvalidResponse(format!(
                "Failed to parse CoinGecko response: {}. Response: {}",
                e, response_text
            ))
        })?;

        let prices = self.parse_response(&parsed, coins);
        if prices.is_empty() {
            return Err(QuoteError::InvalidResponse(
                "No prices returned from CoinGecko".to_string(),
            ));
        }

        tracing::debug!(count = prices.len(), "Fetched prices from CoinGecko");
        Ok(prices)
    }

    /// The listed market behind `pair` and whether `pair` is its inverse
    fn listed_market(&self, pair: &MarketPair) -> Option<(MarketPair, bool)> {
        let listed = |coin: &Symbol, vs: &Symbol| {
            coin != vs && self.coins.contains_key(coin) && self.vs_currencies.contains(vs)
        };
        if listed(&pair.from, &pair.to) {
            Some((pair.clone(), false))
        } else if listed(&pair.to, &pair.from) {
            Some((pair.inverse(), true))
        } else {
            None
        }
    }
}

impl Default for CoinGeckoSource {
    fn default() -> Self {
        Self::with_defaults().expect("Failed to create CoinGecko source")
    }
}

#[async_trait]
impl QuoteSource for CoinGeckoSource {
    async fn get_symbols(&self) -> Result<Vec<Symbol>, QuoteError> {
        let mut symbols: Vec<Symbol> = self.coins.keys().cloned().collect();
        for vs in &self.vs_currencies {
            if !symbols.contains(vs) {
                symbols.push(vs.clone());
            }
        }
        Ok(symbols)
    }

    async fn get_markets(&self) -> Result<Vec<MarketPair>, QuoteError> {
        Ok(self
            .coins
            .keys()
            .flat_map(|coin| {
                self.vs_currencies
                    .iter()
                    .filter(move |vs| *vs != coin)
                    .map(move |vs| MarketPair::new(coin, vs))
            })
            .collect())
    }

    async fn get_base_symbols(&self) -> Result<Vec<Symbol>, QuoteError> {
        Ok(self.vs_currencies.clone())
    }

    async fn get_price(
        &self,
        pair: &MarketPair,
        value: f64,
        use_last_known: bool,
    ) -> Result<f64, QuoteError> {
        if use_last_known {
            return self
                .cache
                .get(pair)
                .await
                .map(|stored| stored.rate * value)
                .ok_or_else(|| QuoteError::not_cached(pair));
        }

        let (market, inverted) = self
            .listed_market(pair)
            .ok_or_else(|| QuoteError::unsupported(pair))?;

        let prices = self.fetch(&[&market.from]).await?;
        let rate = prices
            .iter()
            .find(|(p, _)| *p == market)
            .map(|(_, rate)| *rate)
            .ok_or_else(|| QuoteError::unsupported(&market))?;

        if inverted {
            if rate == 0.0 {
                return Err(QuoteError::InvalidResponse(format!(
                    "Zero price for {}",
                    market
                )));
            }
            Ok(value / rate)
        } else {
            Ok(value * rate)
        }
    }

    async fn get_stored_price(&self, pair: &MarketPair) -> Option<StoredPrice> {
        self.cache.get(pair).await
    }

    fn source_name(&self) -> &'static str {
        "coingecko"
    }

    async fn metrics(&self) -> Option<SourceMetrics> {
        Some(self.metrics.get_metrics().await)
    }
}
