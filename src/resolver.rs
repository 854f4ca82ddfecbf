//! Pricing policy over one graph snapshot
//!
//! Every hop is priced the cheapest way available: a fresh cached rate, then
//! basket valuation, then a live quote from the source. Basket valuation
//! routes each constituent through the graph again, so the three operations
//! recurse into each other; the chain of baskets being valued is carried
//! along to stop a basket that contains itself.

use crate::{
    error::{PriceNetworkError, Result},
    graph::PriceGraph,
    settings::Basket,
    source::QuoteSource,
    types::{MarketPair, Symbol},
};
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;

pub(crate) struct Resolver<'a> {
    source: &'a dyn QuoteSource,
    graph: &'a PriceGraph,
    baskets: &'a BTreeMap<Symbol, Basket>,
    /// Maximum cache age in seconds
    price_update_interval: f64,
    use_last_known: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        source: &'a dyn QuoteSource,
        graph: &'a PriceGraph,
        baskets: &'a BTreeMap<Symbol, Basket>,
        price_update_interval: f64,
        use_last_known: bool,
    ) -> Self {
        Self {
            source,
            graph,
            baskets,
            price_update_interval,
            use_last_known,
        }
    }

    /// Prices `value` units of `from` in `to` along the shortest path
    pub async fn price(&self, from: &Symbol, to: &Symbol, value: f64) -> Result<f64> {
        let mut chain = Vec::new();
        self.route(from, to, value, &mut chain).await
    }

    /// Prices a single market without path search
    pub async fn hop(&self, from: &Symbol, to: &Symbol, value: f64) -> Result<f64> {
        let mut chain = Vec::new();
        self.hop_price(from, to, value, &mut chain).await
    }

    /// Value of one unit of basket `name` in `to`
    pub async fn basket_value(&self, name: &Symbol, to: &Symbol) -> Result<f64> {
        let mut chain = Vec::new();
        self.value_basket(name, to, &mut chain).await
    }

    fn route<'s>(
        &'s self,
        from: &'s Symbol,
        to: &'s Symbol,
        value: f64,
        chain: &'s mut Vec<Symbol>,
    ) -> BoxFuture<'s, Result<f64>> {
        async move {
            if from == to {
                return Ok(value);
            }

            let path = self
                .graph
                .shortest_path(from, to)
                .filter(|path| path.len() > 1)
                .ok_or_else(|| PriceNetworkError::no_route(from, to))?;
            tracing::trace!(from = %from, to = %to, hops = path.len() - 1, "Routing price");

            let mut current = value;
            for hop in path.windows(2) {
                current = self.hop_price(&hop[0], &hop[1], current, chain).await?;
            }
            Ok(current)
        }
        .boxed()
    }

    async fn hop_price(
        &self,
        from: &Symbol,
        to: &Symbol,
        value: f64,
        chain: &mut Vec<Symbol>,
    ) -> Result<f64> {
        let pair = MarketPair::new(from, to);

        if let Some(stored) = self.source.get_stored_price(&pair).await {
            if self.use_last_known || stored.age_secs() <= self.price_update_interval {
                return Ok(stored.rate * value);
            }
        }

        if self.baskets.contains_key(from) {
            return Ok(self.value_basket(from, to, chain).await? * value);
        }

        // one unit of `from` buys 1 / (basket priced in `from`) baskets
        if self.baskets.contains_key(to) {
            let per_basket = self.value_basket(to, from, chain).await?;
            if per_basket == 0.0 {
                return Err(PriceNetworkError::no_route(from, to));
            }
            return Ok(value / per_basket);
        }

        self.source
            .get_price(&pair, value, self.use_last_known)
            .await
            .map_err(|e| PriceNetworkError::quote(&pair, e))
    }

    async fn value_basket(
        &self,
        name: &Symbol,
        to: &Symbol,
        chain: &mut Vec<Symbol>,
    ) -> Result<f64> {
        let basket = self
            .baskets
            .get(name)
            .ok_or_else(|| PriceNetworkError::UnknownBasket(name.to_string()))?;

        if chain.contains(name) {
            chain.push(name.clone());
            let rendered = chain
                .iter()
                .map(Symbol::as_str)
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(PriceNetworkError::CyclicBasket {
                name: name.to_string(),
                chain: rendered,
            });
        }

        chain.push(name.clone());
        let mut total = 0.0;
        for (constituent, weight) in basket {
            total += self.route(constituent, to, *weight, chain).await?;
        }
        chain.pop();

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    fn graph(markets: &[(&str, &str)]) -> PriceGraph {
        let mut g = PriceGraph::new();
        for (a, b) in markets {
            g.add_edge(MarketPair::new(*a, *b), 1.0);
        }
        g
    }

    #[tokio::test]
    async fn test_folds_rates_along_path() {
        let source = MockSource::new();
        source.set_market("XBT", "USD", 40000.0);
        source.set_market("USD", "EUR", 0.5);
        let g = graph(&[("XBT", "USD"), ("USD", "EUR")]);
        let baskets = BTreeMap::new();

        let resolver = Resolver::new(&source, &g, &baskets, 60.0, false);
        let price = resolver.price(&sym("XBT"), &sym("EUR"), 2.0).await.unwrap();
        assert!((price - 40000.0).abs() < 1e-9);

        let back = resolver.price(&sym("EUR"), &sym("XBT"), 20000.0).await.unwrap();
        assert!((back - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_pricing_into_a_basket() {
        let source = MockSource::new();
        source.set_market("XBT", "USD", 100.0);
        source.set_market("ETH", "USD", 10.0);
        let mut g = graph(&[("XBT", "USD"), ("ETH", "USD")]);
        g.add_edge(MarketPair::new("IDX", "USD"), 0.0);

        let mut basket = Basket::new();
        basket.insert(sym("XBT"), 1.0);
        basket.insert(sym("ETH"), 5.0);
        let mut baskets = BTreeMap::new();
        baskets.insert(sym("IDX"), basket);

        let resolver = Resolver::new(&source, &g, &baskets, 60.0, false);
        assert!((resolver.basket_value(&sym("IDX"), &sym("USD")).await.unwrap() - 150.0).abs() < 1e-9);
        let units = resolver.hop(&sym("USD"), &sym("IDX"), 300.0).await.unwrap();
        assert!((units - 2.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_last_known_without_stored_rate_fails() {
        let source = MockSource::new();
        source.set_market("XBT", "USD", 100.0);
        let g = graph(&[("XBT", "USD")]);
        let baskets = BTreeMap::new();

        let resolver = Resolver::new(&source, &g, &baskets, 60.0, true);
        let err = resolver.price(&sym("XBT"), &sym("USD"), 1.0).await.unwrap_err();
        assert!(matches!(
            err,
            PriceNetworkError::Quote {
                source: crate::error::QuoteError::NotCached(_),
                ..
            }
        ));
        assert_eq!(source.total_quotes(), 0);
    }

    #[tokio::test]
    async fn test_unknown_basket() {
        let source = MockSource::new();
        let g = PriceGraph::new();
        let baskets = BTreeMap::new();
        let resolver = Resolver::new(&source, &g, &baskets, 60.0, false);

        let err = resolver.basket_value(&sym("NOPE"), &sym("USD")).await.unwrap_err();
        assert!(matches!(err, PriceNetworkError::UnknownBasket(name) if name == "NOPE"));
    }

    #[tokio::test]
    async fn test_self_referencing_basket_is_reported() {
        let source = MockSource::new();
        source.set_market("XBT", "USD", 100.0);
        let mut g = graph(&[("XBT", "USD")]);
        g.add_edge(MarketPair::new("LOOP", "USD"), 1.0);

        let mut basket = Basket::new();
        basket.insert(sym("XBT"), 1.0);
        basket.insert(sym("LOOP"), 1.0);
        let mut baskets = BTreeMap::new();
        baskets.insert(sym("LOOP"), basket);

        let resolver = Resolver::new(&source, &g, &baskets, 60.0, false);
        let err = resolver.basket_value(&sym("LOOP"), &sym("USD")).await.unwrap_err();
        match err {
            PriceNetworkError::CyclicBasket { name, chain } => {
                assert_eq!(name, "LOOP");
                assert_eq!(chain, "LOOP -> LOOP");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
