//! # Price Network
//!
//! Converts between any two symbols a quote source knows by walking the
//! shortest chain of directly tradable markets, pricing each hop from a
//! cached rate when it is fresh enough and from the source otherwise.
//!
//! User-defined baskets (weighted sets of symbols) are priced like any other
//! symbol. Basket definitions and runtime options live in a JSON settings file
//! guarded by a lock file and written atomically, with an optional background
//! task flushing it periodically.
//!
//! ## Usage
//!
//! ```no_run
//! use price_network::{sources, ConfigStore, PriceNetwork, SettingsFlusher};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Arc::new(ConfigStore::from_env());
//! let flusher = SettingsFlusher::spawn(settings.clone());
//! let network = PriceNetwork::new(sources::from_env()?, settings).await?;
//!
//! let mut basket = BTreeMap::new();
//! basket.insert("BTC".into(), 0.5);
//! basket.insert("ETH".into(), 4.0);
//! network.set_basket("MIX", basket).await?;
//!
//! let value = network.get_basket_value("MIX", "EUR", false).await?;
//! println!("MIX: {:.2} EUR", value);
//!
//! flusher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod network;
mod resolver;
pub mod settings;
pub mod source;
pub mod sources;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{PriceNetworkError, QuoteError, SettingsError};
pub use graph::{GraphBuildReport, PriceGraph};
pub use metrics::SourceMetrics;
pub use network::PriceNetwork;
pub use settings::{Basket, ConfigStore, Settings, SettingsFlusher};
pub use source::QuoteSource;
pub use types::{
    ComponentHealth, HealthStatus, MarketPair, NetworkEvent, StoredPrice, Symbol,
};
