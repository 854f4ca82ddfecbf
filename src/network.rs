//! Price network: routes conversions between any two known symbols
//!
//! The network owns one graph snapshot built from the quote source's markets
//! plus the basket markets it can price itself. The snapshot is built on
//! first use and rebuilt wholesale when baskets change or on request.

use crate::{
    constants::{EVENT_CHANNEL_CAPACITY, PRICE_UPDATE_INTERVAL},
    error::{PriceNetworkError, Result, SettingsError},
    graph::{DroppedMarket, GraphBuildReport, PriceGraph},
    resolver::Resolver,
    settings::{Basket, ConfigStore},
    source::QuoteSource,
    types::{ComponentHealth, HealthStatus, MarketPair, NetworkEvent, Symbol},
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Routes prices across every market a quote source knows, plus baskets
///
/// # Example
/// ```no_run
/// use price_network::{ConfigStore, PriceNetwork, QuoteSource};
/// use price_network::sources::CoinGeckoSource;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source: Arc<dyn QuoteSource> = Arc::new(CoinGeckoSource::with_defaults()?);
/// let settings = Arc::new(ConfigStore::from_env());
/// let network = PriceNetwork::new(source, settings).await?;
///
/// let eth_in_btc = network.price("ETH/BTC", 1.0, false).await?;
/// println!("1 ETH = {:.6} BTC", eth_in_btc);
/// # Ok(())
/// # }
/// ```
pub struct PriceNetwork {
    source: Arc<dyn QuoteSource>,
    settings: Arc<ConfigStore>,
    graph: RwLock<Option<Arc<PriceGraph>>>,
    /// Held for the whole of a build so only one runs at a time
    build_guard: Mutex<()>,
    /// Rebuild requests issued so far
    requested_builds: AtomicU64,
    /// Highest request number the current snapshot accounts for
    covered_builds: AtomicU64,
    last_report: RwLock<Option<GraphBuildReport>>,
    events: broadcast::Sender<NetworkEvent>,
}

impl PriceNetwork {
    /// Creates a network; the graph is built lazily on first use
    pub async fn new(source: Arc<dyn QuoteSource>, settings: Arc<ConfigStore>) -> Result<Self> {
        settings.ensure_baskets_section().await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            source,
            settings,
            graph: RwLock::new(None),
            build_guard: Mutex::new(()),
            requested_builds: AtomicU64::new(0),
            covered_builds: AtomicU64::new(0),
            last_report: RwLock::new(None),
            events,
        })
    }

    pub fn settings(&self) -> &Arc<ConfigStore> {
        &self.settings
    }

    pub fn source_name(&self) -> &str {
        self.source.source_name()
    }

    /// Subscribes to graph and basket events
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Current graph snapshot, if one has been built
    pub async fn graph_snapshot(&self) -> Option<Arc<PriceGraph>> {
        self.graph.read().await.clone()
    }

    /// Report of the most recent graph build
    pub async fn last_build_report(&self) -> Option<GraphBuildReport> {
        self.last_report.read().await.clone()
    }

    /// (Re-)builds the graph now, replacing the current snapshot
    pub async fn init_graph(&self) -> Result<Arc<PriceGraph>> {
        self.rebuild(true).await
    }

    /// Prices `value` units of `from` in `to`
    ///
    /// Walks the fewest-hop chain of markets between the two symbols and
    /// prices each hop in turn. With `use_last_known`, cached rates are used
    /// regardless of age and no fresh quotes are requested.
    pub async fn get_price(
        &self,
        from: impl Into<Symbol>,
        to: impl Into<Symbol>,
        value: f64,
        use_last_known: bool,
    ) -> Result<f64> {
        let (from, to) = (from.into(), to.into());
        if from == to {
            return Ok(value);
        }

        let graph = self.price_graph().await?;
        let baskets = self.settings.get_baskets().await?;
        let interval = self.price_update_interval().await?;

        Resolver::new(self.source.as_ref(), &graph, &baskets, interval, use_last_known)
            .price(&from, &to, value)
            .await
    }

    /// Prices a `FROM/TO` pair string, e.g. `XBT/USD`
    pub async fn price(&self, pair: &str, value: f64, use_last_known: bool) -> Result<f64> {
        let pair: MarketPair = pair.parse()?;
        self.get_price(pair.from, pair.to, value, use_last_known)
            .await
    }

    /// Value of one unit of basket `name` in `to`
    pub async fn get_basket_value(
        &self,
        name: impl Into<Symbol>,
        to: impl Into<Symbol>,
        use_last_known: bool,
    ) -> Result<f64> {
        let (name, to) = (name.into(), to.into());
        let baskets = self.settings.get_baskets().await?;
        if !baskets.contains_key(&name) {
            return Err(PriceNetworkError::UnknownBasket(name.to_string()));
        }

        let graph = self.price_graph().await?;
        let interval = self.price_update_interval().await?;
        Resolver::new(self.source.as_ref(), &graph, &baskets, interval, use_last_known)
            .basket_value(&name, &to)
            .await
    }

    /// Basket names followed by the source's symbols
    pub async fn get_symbols(&self) -> Result<Vec<Symbol>> {
        let mut symbols: Vec<Symbol> = self.settings.get_baskets().await?.into_keys().collect();
        symbols.extend(
            self.source
                .get_symbols()
                .await
                .map_err(PriceNetworkError::Source)?,
        );
        Ok(symbols)
    }

    /// Source markets plus every basket/base market that can be priced
    pub async fn get_markets(&self) -> Result<Vec<MarketPair>> {
        let mut markets = self
            .source
            .get_markets()
            .await
            .map_err(PriceNetworkError::Source)?;

        let graph = self.price_graph().await?;
        let baskets = self.settings.get_baskets().await?;
        let bases = self
            .source
            .get_base_symbols()
            .await
            .map_err(PriceNetworkError::Source)?;
        let interval = self.price_update_interval().await?;

        let resolver = Resolver::new(self.source.as_ref(), &graph, &baskets, interval, true);
        for pair in basket_pairs(&baskets, &bases) {
            if resolver.hop(&pair.from, &pair.to, 1.0).await.is_ok() {
                markets.push(pair);
            }
        }
        Ok(markets)
    }

    pub async fn get_baskets(&self) -> Result<BTreeMap<Symbol, Basket>> {
        Ok(self.settings.get_baskets().await?)
    }

    pub async fn get_basket(&self, name: impl Into<Symbol>) -> Result<Basket> {
        self.settings
            .get_basket(&name.into())
            .await
            .map_err(basket_error)
    }

    /// Adds or replaces a basket, then rebuilds the graph
    pub async fn set_basket(&self, name: impl Into<Symbol>, basket: Basket) -> Result<()> {
        let name = name.into();
        validate_basket(&name, &basket)?;

        let symbols = self
            .source
            .get_symbols()
            .await
            .map_err(PriceNetworkError::Source)?;
        if symbols.contains(&name) {
            return Err(PriceNetworkError::BasketConflict(name.to_string()));
        }

        self.settings.set_basket(&name, basket).await?;
        tracing::info!(basket = %name, "Basket updated");
        self.publish(NetworkEvent::basket_changed(&name, false));

        self.rebuild(true).await?;
        Ok(())
    }

    /// Removes a basket, then rebuilds the graph
    pub async fn remove_basket(&self, name: impl Into<Symbol>) -> Result<()> {
        let name = name.into();
        self.settings
            .remove_basket(&name)
            .await
            .map_err(basket_error)?;
        tracing::info!(basket = %name, "Basket removed");
        self.publish(NetworkEvent::basket_changed(&name, true));

        self.rebuild(true).await?;
        Ok(())
    }

    /// Perform a health check on the price network
    pub async fn health_check(&self) -> ComponentHealth {
        let mut details = HashMap::new();
        details.insert(
            "source_name".to_string(),
            serde_json::json!(self.source.source_name()),
        );

        let graph = self.graph_snapshot().await;
        let report = self.last_build_report().await;

        if let Some(graph) = &graph {
            details.insert("symbols".to_string(), serde_json::json!(graph.node_count()));
            details.insert("markets".to_string(), serde_json::json!(graph.edge_count()));
        }
        let dropped: Vec<String> = report
            .as_ref()
            .map(|r| r.dropped.iter().map(|d| d.pair.clone()).collect())
            .unwrap_or_default();
        details.insert("dropped_markets".to_string(), serde_json::json!(dropped));
        if let Some(metrics) = self.source.metrics().await {
            details.insert("source_metrics".to_string(), serde_json::json!(metrics));
        }

        let status = match &graph {
            Some(graph) if graph.edge_count() > 0 => {
                if dropped.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                }
            }
            _ => HealthStatus::Unhealthy,
        };

        let message = match status {
            HealthStatus::Healthy => "Price network is operational".to_string(),
            HealthStatus::Degraded => {
                format!("Price network dropped {} markets", dropped.len())
            }
            HealthStatus::Unhealthy => "Price network has no usable graph".to_string(),
        };

        ComponentHealth {
            name: "price_network".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: Utc::now(),
        }
    }

    fn publish(&self, event: NetworkEvent) {
        tracing::trace!(event = event.event_type(), "{}", event);
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    async fn price_update_interval(&self) -> Result<f64> {
        Ok(self.settings.get_option::<f64>(PRICE_UPDATE_INTERVAL).await?)
    }

    /// Current snapshot, building it first if there is none
    async fn price_graph(&self) -> Result<Arc<PriceGraph>> {
        if let Some(graph) = self.graph.read().await.as_ref() {
            return Ok(graph.clone());
        }
        self.rebuild(false).await
    }

    /// Builds and installs a new snapshot
    ///
    /// Callers queue on the build guard. A lazy caller takes whatever snapshot
    /// exists by then; a forced caller only skips its build when a build that
    /// started after its request has already finished.
    async fn rebuild(&self, force: bool) -> Result<Arc<PriceGraph>> {
        let ticket = self.requested_builds.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.build_guard.lock().await;

        if let Some(graph) = self.graph.read().await.as_ref() {
            if !force || self.covered_builds.load(Ordering::SeqCst) >= ticket {
                return Ok(graph.clone());
            }
        }

        let covers = self.requested_builds.load(Ordering::SeqCst);
        let (graph, report) = self.generate_graph().await?;
        let graph = Arc::new(graph);

        let event = NetworkEvent::graph_rebuilt(
            graph.node_count(),
            graph.edge_count(),
            report.dropped.len(),
        );
        *self.graph.write().await = Some(graph.clone());
        *self.last_report.write().await = Some(report);
        self.covered_builds.store(covers, Ordering::SeqCst);
        self.publish(event);

        Ok(graph)
    }

    async fn generate_graph(&self) -> Result<(PriceGraph, GraphBuildReport)> {
        let started = Instant::now();
        let mut report = GraphBuildReport {
            started_at: Some(Utc::now()),
            ..GraphBuildReport::default()
        };

        let baskets = self.settings.get_baskets().await?;
        let interval = self.price_update_interval().await?;
        let source_err = PriceNetworkError::Source;
        let symbols = self.source.get_symbols().await.map_err(source_err)?;
        let markets = self.source.get_markets().await.map_err(source_err)?;
        let bases = self.source.get_base_symbols().await.map_err(source_err)?;

        let mut graph = PriceGraph::new();
        graph.add_nodes(baskets.keys().cloned());
        graph.add_nodes(symbols);

        tracing::info!(markets = markets.len(), "Polling known markets");
        let mut priced = Vec::with_capacity(markets.len());
        {
            let resolver =
                Resolver::new(self.source.as_ref(), &graph, &baskets, interval, false);
            for pair in markets {
                let result = match self.source.get_stored_price(&pair).await {
                    Some(stored) => {
                        tracing::debug!(pair = %pair, "Loading market");
                        Ok(stored.rate)
                    }
                    None => {
                        tracing::debug!(pair = %pair, "Adding market");
                        resolver.hop(&pair.from, &pair.to, 1.0).await
                    }
                };
                priced.push((pair, result));
            }
        }

        for (pair, result) in priced {
            match result {
                Ok(price) => {
                    report.markets.push((pair.to_string(), price));
                    graph.add_edge(pair, price);
                }
                Err(e) => {
                    tracing::warn!(pair = %pair, error = %e, "Dropping market");
                    self.publish(NetworkEvent::market_dropped(&pair, e.to_string()));
                    report.dropped.push(DroppedMarket {
                        pair: pair.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        // Basket markets are probed in rounds: a basket holding another basket
        // can only be routed once the inner basket has its own edge.
        let mut pending = basket_pairs(&baskets, &bases);
        while !pending.is_empty() {
            let mut added = Vec::new();
            let mut unpriced = Vec::new();
            {
                let resolver =
                    Resolver::new(self.source.as_ref(), &graph, &baskets, interval, true);
                for pair in pending {
                    match resolver.hop(&pair.from, &pair.to, 1.0).await {
                        Ok(price) => added.push((pair, price)),
                        Err(e) => unpriced.push((pair, e)),
                    }
                }
            }

            if added.is_empty() {
                for (pair, e) in &unpriced {
                    tracing::debug!(pair = %pair, error = %e, "Basket market not priceable");
                }
                break;
            }
            for (pair, price) in added {
                report.basket_markets.push((pair.to_string(), price));
                graph.add_edge(pair, price);
            }
            pending = unpriced.into_iter().map(|(pair, _)| pair).collect();
        }

        report.symbols = graph.node_count();
        report.elapsed = started.elapsed();

        tracing::info!(
            markets = report.markets.len(),
            basket_markets = report.basket_markets.len(),
            dropped = report.dropped.len(),
            symbols = report.symbols,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Price graph built"
        );
        if report.is_degraded() {
            let dropped: Vec<&str> = report.dropped.iter().map(|d| d.pair.as_str()).collect();
            tracing::warn!(?dropped, "Markets dropped due to errors getting last price");
        }

        Ok((graph, report))
    }
}

/// Every (basket, base symbol) pair
fn basket_pairs(baskets: &BTreeMap<Symbol, Basket>, bases: &[Symbol]) -> Vec<MarketPair> {
    baskets
        .keys()
        .flat_map(|basket| bases.iter().map(move |base| MarketPair::new(basket, base)))
        .filter(|pair| pair.from != pair.to)
        .collect()
}

fn validate_basket(name: &Symbol, basket: &Basket) -> Result<()> {
    if name.is_empty() || name.as_str().contains('/') {
        return Err(PriceNetworkError::invalid_basket(name, "invalid name"));
    }
    if basket.is_empty() {
        return Err(PriceNetworkError::invalid_basket(name, "no constituents"));
    }
    if let Some((constituent, weight)) = basket
        .iter()
        .find(|(_, weight)| !weight.is_finite() || **weight <= 0.0)
    {
        return Err(PriceNetworkError::invalid_basket(
            name,
            format!("weight {} for {} must be positive", weight, constituent),
        ));
    }
    Ok(())
}

fn basket_error(e: SettingsError) -> PriceNetworkError {
    match e {
        SettingsError::NoSuchBasket(name) => PriceNetworkError::UnknownBasket(name),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        source: Arc<MockSource>,
        network: Arc<PriceNetwork>,
    }

    async fn fixture(source: MockSource) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(ConfigStore::new(dir.path().join("settings.json")));
        let source = Arc::new(source);
        let network = PriceNetwork::new(source.clone(), settings).await.unwrap();
        Fixture {
            _dir: dir,
            source,
            network: Arc::new(network),
        }
    }

    fn basket(items: &[(&str, f64)]) -> Basket {
        items
            .iter()
            .map(|(symbol, weight)| (Symbol::new(symbol), *weight))
            .collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * b.abs().max(1.0)
    }

    /// XBT/USD 40000, ETH/USD 2000, USD/EUR 0.9; USD is the base symbol
    fn crypto_source() -> MockSource {
        let source = MockSource::new();
        source.set_market("XBT", "USD", 40000.0);
        source.set_market("ETH", "USD", 2000.0);
        source.set_market("USD", "EUR", 0.9);
        source.set_base("USD");
        source
    }

    #[tokio::test]
    async fn test_same_symbol_returns_value_without_graph() {
        let f = fixture(crypto_source()).await;

        assert_eq!(f.network.get_price("XBT", "xbt", 3.5, false).await.unwrap(), 3.5);
        assert_eq!(f.network.get_price("NOPE", "NOPE", 1.0, false).await.unwrap(), 1.0);
        assert!(f.network.graph_snapshot().await.is_none());
        assert_eq!(f.source.listing_count(), 0);
    }

    #[tokio::test]
    async fn test_multi_hop_price_composes_rates() {
        let f = fixture(crypto_source()).await;

        let xbt_eur = f.network.get_price("XBT", "EUR", 1.0, false).await.unwrap();
        assert!(close(xbt_eur, 40000.0 * 0.9));

        let eth_xbt = f.network.get_price("ETH", "XBT", 2.0, false).await.unwrap();
        assert!(close(eth_xbt, 2.0 * 2000.0 / 40000.0));
    }

    #[tokio::test]
    async fn test_price_parses_pair_string() {
        let f = fixture(crypto_source()).await;

        let parsed = f.network.price("XBT/USD", 3.0, false).await.unwrap();
        let direct = f.network.get_price("XBT", "USD", 3.0, false).await.unwrap();
        assert_eq!(parsed, direct);

        let err = f.network.price("XBTUSD", 1.0, false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::Parse(_)));
    }

    #[tokio::test]
    async fn test_disconnected_symbols_have_no_route() {
        let source = crypto_source();
        source.set_market("GOLD", "SILVER", 80.0);
        let f = fixture(source).await;

        let err = f.network.get_price("XBT", "GOLD", 1.0, false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::NoRoute { .. }));
        let err = f.network.get_price("XBT", "UNLISTED", 1.0, false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn test_fresh_cache_is_reused() {
        let source = crypto_source();
        source.store_price("XBT", "USD", 39000.0, 5).await;
        let f = fixture(source).await;

        let price = f.network.get_price("XBT", "USD", 1.0, false).await.unwrap();
        assert_eq!(price, 39000.0);
        assert_eq!(f.source.quote_count("XBT", "USD"), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_is_requoted() {
        let source = crypto_source();
        source.store_price("XBT", "USD", 39000.0, 3600).await;
        let f = fixture(source).await;

        let price = f.network.get_price("XBT", "USD", 1.0, false).await.unwrap();
        assert_eq!(price, 40000.0);
        assert_eq!(f.source.quote_count("XBT", "USD"), 1);
    }

    #[tokio::test]
    async fn test_last_known_reuses_stale_cache() {
        let source = crypto_source();
        source.store_price("XBT", "USD", 39000.0, 3600).await;
        let f = fixture(source).await;

        let price = f.network.get_price("XBT", "USD", 2.0, true).await.unwrap();
        assert_eq!(price, 78000.0);
        assert_eq!(f.source.quote_count("XBT", "USD"), 0);
    }

    #[tokio::test]
    async fn test_last_known_never_fetches() {
        let f = fixture(crypto_source()).await;
        f.network.init_graph().await.unwrap();
        let quotes = f.source.total_quotes();
        f.network
            .settings()
            .set_option(PRICE_UPDATE_INTERVAL, 0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let price = f.network.get_price("XBT", "EUR", 1.0, true).await.unwrap();
        assert!(close(price, 36000.0));
        assert_eq!(f.source.total_quotes(), quotes);
    }

    #[tokio::test]
    async fn test_configured_interval_controls_freshness() {
        let source = crypto_source();
        source.store_price("ETH", "USD", 1900.0, 30).await;
        let f = fixture(source).await;
        f.network
            .settings()
            .set_option(PRICE_UPDATE_INTERVAL, 10)
            .await
            .unwrap();

        let price = f.network.get_price("ETH", "USD", 1.0, false).await.unwrap();
        assert_eq!(price, 2000.0);
    }

    #[tokio::test]
    async fn test_basket_value_is_weighted_sum() {
        let f = fixture(crypto_source()).await;
        f.network
            .set_basket("mix", basket(&[("XBT", 2.0), ("ETH", 1.0)]))
            .await
            .unwrap();

        let value = f.network.get_basket_value("MIX", "EUR", false).await.unwrap();
        let xbt = f.network.get_price("XBT", "EUR", 1.0, false).await.unwrap();
        let eth = f.network.get_price("ETH", "EUR", 1.0, false).await.unwrap();
        assert!(close(value, 2.0 * xbt + eth));

        let routed = f.network.get_price("MIX", "EUR", 1.0, false).await.unwrap();
        assert!(close(routed, value));
    }

    #[tokio::test]
    async fn test_basket_markets_join_the_graph() {
        let f = fixture(crypto_source()).await;
        f.network
            .set_basket("MIX", basket(&[("XBT", 1.0), ("ETH", 10.0)]))
            .await
            .unwrap();

        let markets = f.network.get_markets().await.unwrap();
        assert!(markets.contains(&MarketPair::new("MIX", "USD")));
        assert!(markets.contains(&MarketPair::new("XBT", "USD")));

        let graph = f.network.graph_snapshot().await.unwrap();
        let edge = graph.edge(&Symbol::new("MIX"), &Symbol::new("USD")).unwrap();
        assert!(close(edge.last_price, 60000.0));

        let symbols = f.network.get_symbols().await.unwrap();
        assert_eq!(symbols[0], Symbol::new("MIX"));
        assert!(symbols.contains(&Symbol::new("ETH")));
    }

    #[tokio::test]
    async fn test_nested_baskets_resolve() {
        let f = fixture(crypto_source()).await;
        f.network
            .set_basket("INNER", basket(&[("XBT", 1.0)]))
            .await
            .unwrap();
        f.network
            .set_basket("OUTER", basket(&[("INNER", 2.0), ("ETH", 1.0)]))
            .await
            .unwrap();

        let outer = f.network.get_price("OUTER", "USD", 1.0, false).await.unwrap();
        assert!(close(outer, 2.0 * 40000.0 + 2000.0));

        let report = f.network.last_build_report().await.unwrap();
        assert_eq!(report.basket_markets.len(), 2);
    }

    #[tokio::test]
    async fn test_cyclic_baskets_fail_instead_of_recursing() {
        let source = crypto_source();
        // a stale cached B/USD lets B (and then A) join the graph
        source.store_price("B", "USD", 1.0, 3600).await;
        let f = fixture(source).await;
        let settings = f.network.settings();
        settings
            .set_basket(&Symbol::new("A"), basket(&[("B", 1.0)]))
            .await
            .unwrap();
        settings
            .set_basket(&Symbol::new("B"), basket(&[("XBT", 1.0), ("A", 1.0)]))
            .await
            .unwrap();

        let err = f.network.get_basket_value("A", "USD", false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::CyclicBasket { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_unknown_basket() {
        let f = fixture(crypto_source()).await;

        let err = f.network.get_basket_value("NOPE", "USD", false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::UnknownBasket(_)));
        let err = f.network.remove_basket("NOPE").await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::UnknownBasket(_)));
        let err = f.network.get_basket("NOPE").await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::UnknownBasket(_)));
    }

    #[tokio::test]
    async fn test_invalid_and_conflicting_baskets_are_rejected() {
        let f = fixture(crypto_source()).await;

        let err = f.network.set_basket("EMPTY", Basket::new()).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::InvalidBasket { .. }));

        let err = f
            .network
            .set_basket("NEG", basket(&[("XBT", -1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PriceNetworkError::InvalidBasket { .. }));

        let err = f
            .network
            .set_basket("XBT", basket(&[("ETH", 1.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PriceNetworkError::BasketConflict(_)));

        assert!(f.network.get_baskets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_basket_rebuilds_graph() {
        let f = fixture(crypto_source()).await;
        f.network
            .set_basket("MIX", basket(&[("XBT", 1.0)]))
            .await
            .unwrap();
        assert!(f.network.graph_snapshot().await.unwrap().contains(&Symbol::new("MIX")));

        f.network.remove_basket("MIX").await.unwrap();
        let graph = f.network.graph_snapshot().await.unwrap();
        assert!(!graph.contains(&Symbol::new("MIX")));
        let err = f.network.get_price("MIX", "USD", 1.0, false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn test_failed_market_is_dropped_not_fatal() {
        let source = crypto_source();
        source.set_error("LTC", "USD", "exchange offline");
        let f = fixture(source).await;
        let mut events = f.network.subscribe();

        let price = f.network.get_price("ETH", "EUR", 1.0, false).await.unwrap();
        assert!(close(price, 1800.0));

        let report = f.network.last_build_report().await.unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].pair, "LTC/USD");
        assert!(report.dropped[0].reason.contains("exchange offline"));

        let first = events.recv().await.unwrap();
        assert_eq!(first.event_type(), "MARKET_DROPPED");
        let second = events.recv().await.unwrap();
        assert_eq!(second.event_type(), "GRAPH_REBUILT");

        let health = f.network.health_check().await;
        assert_eq!(health.status, HealthStatus::Degraded);

        let err = f.network.get_price("LTC", "USD", 1.0, false).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::NoRoute { .. }));
    }

    #[tokio::test]
    async fn test_failed_hop_aborts_routing() {
        let f = fixture(crypto_source()).await;
        f.network.init_graph().await.unwrap();
        // stale everything, then break the USD/EUR quote
        f.network
            .settings()
            .set_option(PRICE_UPDATE_INTERVAL, 0)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.source.set_error("USD", "EUR", "feed down");

        let err = f.network.get_price("XBT", "EUR", 1.0, false).await.unwrap_err();
        match err {
            PriceNetworkError::Quote { pair, .. } => assert_eq!(pair, "USD/EUR"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_one_build() {
        let source = crypto_source();
        source.set_listing_delay(Duration::from_millis(50));
        let f = fixture(source).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let network = f.network.clone();
            handles.push(tokio::spawn(async move {
                network.get_price("XBT", "EUR", 1.0, false).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(f.source.listing_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_basket_updates_stay_consistent() {
        let f = fixture(crypto_source()).await;

        let mut handles = Vec::new();
        for i in 0..6 {
            let network = f.network.clone();
            handles.push(tokio::spawn(async move {
                network
                    .set_basket(format!("B{}", i), basket(&[("XBT", 1.0 + i as f64)]))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let symbols = f.network.get_symbols().await.unwrap();
        for i in 0..6 {
            assert!(symbols.contains(&Symbol::new(format!("B{}", i))));
        }
        // the last rebuild saw every basket
        let graph = f.network.graph_snapshot().await.unwrap();
        for i in 0..6 {
            assert!(graph.contains(&Symbol::new(format!("B{}", i))));
        }
    }

    #[tokio::test]
    async fn test_health_before_and_after_build() {
        let f = fixture(crypto_source()).await;

        let health = f.network.health_check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);

        f.network.init_graph().await.unwrap();
        let health = f.network.health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details["markets"], serde_json::json!(3));
    }
}
