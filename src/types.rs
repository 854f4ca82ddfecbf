//! Types for the price network

use crate::error::PriceNetworkError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Asset or basket symbol, trimmed and upper-cased on construction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Creates a normalized symbol
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&Symbol> for Symbol {
    fn from(value: &Symbol) -> Self {
        value.clone()
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered market pair, rendered as `FROM/TO`
///
/// A price for a pair is the value of one unit of `from` expressed in `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketPair {
    pub from: Symbol,
    pub to: Symbol,
}

impl MarketPair {
    pub fn new(from: impl Into<Symbol>, to: impl Into<Symbol>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The same market seen from the other side
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl fmt::Display for MarketPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

impl FromStr for MarketPair {
    type Err = PriceNetworkError;

    /// Parses `FROM/TO`; exactly one separator and two non-empty sides
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(from), Some(to), None) => {
                let pair = MarketPair::new(from, to);
                if pair.from.is_empty() || pair.to.is_empty() {
                    return Err(PriceNetworkError::Parse(s.to_string()));
                }
                Ok(pair)
            }
            _ => Err(PriceNetworkError::Parse(s.to_string())),
        }
    }
}

/// A rate held in a quote source's cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPrice {
    /// Units of `to` per unit of `from`
    pub rate: f64,

    /// When the rate was observed
    pub observed_at: DateTime<Utc>,

    /// Source that observed it
    pub source: String,
}

impl StoredPrice {
    pub fn new(rate: f64, source: impl Into<String>) -> Self {
        Self::observed(rate, Utc::now(), source)
    }

    pub fn observed(rate: f64, observed_at: DateTime<Utc>, source: impl Into<String>) -> Self {
        Self {
            rate,
            observed_at,
            source: source.into(),
        }
    }

    /// Age of the rate in fractional seconds, never negative
    pub fn age_secs(&self) -> f64 {
        let age = Utc::now().signed_duration_since(self.observed_at);
        (age.num_milliseconds().max(0) as f64) / 1000.0
    }

    /// Check if the rate is older than `threshold_secs`
    pub fn is_stale(&self, threshold_secs: f64) -> bool {
        self.age_secs() > threshold_secs
    }
}

/// Events published by the price network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkEvent {
    /// The price graph was replaced
    GraphRebuilt {
        id: Uuid,
        nodes: usize,
        edges: usize,
        dropped: usize,
        timestamp: DateTime<Utc>,
    },

    /// A market was left out of the graph because it could not be priced
    MarketDropped {
        id: Uuid,
        pair: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A basket definition was added, replaced or removed
    BasketChanged {
        id: Uuid,
        name: String,
        removed: bool,
        timestamp: DateTime<Utc>,
    },
}

impl NetworkEvent {
    pub fn graph_rebuilt(nodes: usize, edges: usize, dropped: usize) -> Self {
        Self::GraphRebuilt {
            id: Uuid::new_v4(),
            nodes,
            edges,
            dropped,
            timestamp: Utc::now(),
        }
    }

    pub fn market_dropped(pair: &MarketPair, error_message: impl Into<String>) -> Self {
        Self::MarketDropped {
            id: Uuid::new_v4(),
            pair: pair.to_string(),
            error_message: error_message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn basket_changed(name: &Symbol, removed: bool) -> Self {
        Self::BasketChanged {
            id: Uuid::new_v4(),
            name: name.to_string(),
            removed,
            timestamp: Utc::now(),
        }
    }

    /// Get the event ID
    pub fn id(&self) -> Uuid {
        match self {
            NetworkEvent::GraphRebuilt { id, .. } => *id,
            NetworkEvent::MarketDropped { id, .. } => *id,
            NetworkEvent::BasketChanged { id, .. } => *id,
        }
    }

    /// Get the event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            NetworkEvent::GraphRebuilt { .. } => "GRAPH_REBUILT",
            NetworkEvent::MarketDropped { .. } => "MARKET_DROPPED",
            NetworkEvent::BasketChanged { .. } => "BASKET_CHANGED",
        }
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEvent::GraphRebuilt {
                nodes,
                edges,
                dropped,
                ..
            } => write!(
                f,
                "Graph rebuilt: {} symbols, {} markets, {} dropped",
                nodes, edges, dropped
            ),
            NetworkEvent::MarketDropped {
                pair,
                error_message,
                ..
            } => write!(f, "Market {} dropped: {}", pair, error_message),
            NetworkEvent::BasketChanged { name, removed, .. } => {
                if *removed {
                    write!(f, "Basket {} removed", name)
                } else {
                    write!(f, "Basket {} updated", name)
                }
            }
        }
    }
}

/// Overall component health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Graph is built and every listed market is priced
    Healthy,
    /// Graph is usable but some markets were dropped
    Degraded,
    /// No usable graph
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}
