//! Undirected graph of symbols linked by directly tradable markets

use crate::types::{MarketPair, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

/// Market edge as it was priced when the graph was built
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Orientation the price was observed in
    pub pair: MarketPair,
    /// Units of `pair.to` per unit of `pair.from`
    pub last_price: f64,
}

/// Snapshot of the exchange network
///
/// Adjacency is kept in ordered maps so path search visits neighbours in
/// symbol order and ties between equal-length paths resolve the same way on
/// every build.
#[derive(Debug, Clone, Default)]
pub struct PriceGraph {
    adj: BTreeMap<Symbol, BTreeMap<Symbol, Edge>>,
}

impl PriceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a symbol with no markets; existing symbols are left as they are
    pub fn add_node(&mut self, symbol: Symbol) {
        self.adj.entry(symbol).or_default();
    }

    pub fn add_nodes(&mut self, symbols: impl IntoIterator<Item = Symbol>) {
        for symbol in symbols {
            self.add_node(symbol);
        }
    }

    /// Links the two sides of `pair`, replacing any previous edge between them
    pub fn add_edge(&mut self, pair: MarketPair, last_price: f64) {
        if pair.from == pair.to {
            return;
        }
        let edge = Edge {
            pair: pair.clone(),
            last_price,
        };
        self.adj
            .entry(pair.from.clone())
            .or_default()
            .insert(pair.to.clone(), edge.clone());
        self.adj.entry(pair.to).or_default().insert(pair.from, edge);
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.adj.contains_key(symbol)
    }

    pub fn edge(&self, a: &Symbol, b: &Symbol) -> Option<&Edge> {
        self.adj.get(a).and_then(|n| n.get(b))
    }

    pub fn neighbors(&self, symbol: &Symbol) -> impl Iterator<Item = &Symbol> {
        self.adj.get(symbol).into_iter().flat_map(|n| n.keys())
    }

    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adj.values().map(|n| n.len()).sum::<usize>() / 2
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.adj.keys()
    }

    /// Fewest-hop path from `from` to `to`, both ends included
    ///
    /// Breadth-first search; `None` when either symbol is unknown or the two
    /// lie in different components.
    pub fn shortest_path(&self, from: &Symbol, to: &Symbol) -> Option<Vec<Symbol>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(vec![from.clone()]);
        }

        let mut parent: HashMap<&Symbol, &Symbol> = HashMap::new();
        let mut queue: VecDeque<&Symbol> = VecDeque::new();
        parent.insert(from, from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.neighbors(current) {
                if parent.contains_key(neighbor) {
                    continue;
                }
                parent.insert(neighbor, current);
                if neighbor == to {
                    return Some(unwind(&parent, from, to));
                }
                queue.push_back(neighbor);
            }
        }

        None
    }
}

fn unwind(parent: &HashMap<&Symbol, &Symbol>, from: &Symbol, to: &Symbol) -> Vec<Symbol> {
    let mut path = vec![to.clone()];
    let mut current = to;
    while current != from {
        match parent.get(current) {
            Some(prev) => {
                current = prev;
                path.push(current.clone());
            }
            None => break,
        }
    }
    path.reverse();
    path
}

/// Market that could not be priced during a build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedMarket {
    pub pair: String,
    pub reason: String,
}

/// Outcome of one graph build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphBuildReport {
    /// Quote source markets that made it into the graph
    pub markets: Vec<(String, f64)>,
    /// Basket markets that made it into the graph
    pub basket_markets: Vec<(String, f64)>,
    pub dropped: Vec<DroppedMarket>,
    pub symbols: usize,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl GraphBuildReport {
    pub fn is_degraded(&self) -> bool {
        !self.dropped.is_empty()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
