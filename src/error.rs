//! Error types for the price network

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when asking a quote source for prices
#[derive(Debug, Error)]
pub enum QuoteError {
    /// Network request failed
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid response from the source
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Market not quoted by this source
    #[error("Market not supported: {0}")]
    UnsupportedMarket(String),

    /// Source API error
    #[error("Source API error: {0}")]
    ApiError(String),

    /// Timeout waiting for response
    #[error("Request timeout")]
    Timeout,

    /// Last-known price requested but nothing is stored for the pair
    #[error("No stored price for {0}")]
    NotCached(String),
}

impl QuoteError {
    /// Creates an UnsupportedMarket error
    pub fn unsupported(pair: impl ToString) -> Self {
        Self::UnsupportedMarket(pair.to_string())
    }

    /// Creates a NotCached error
    pub fn not_cached(pair: impl ToString) -> Self {
        Self::NotCached(pair.to_string())
    }
}

/// Errors raised by the settings store
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A required settings section is absent
    #[error("Missing {0} section in settings")]
    MissingSection(&'static str),

    /// Argument or merged value does not fit the settings schema
    #[error("Invalid settings argument: {0}")]
    InvalidArgument(String),

    #[error("No such option {0}")]
    NoSuchOption(String),

    #[error("No such site {0} in credentials")]
    NoSuchSite(String),

    #[error("No such basket {0}")]
    NoSuchBasket(String),

    /// Settings file could not be read, written or locked
    #[error("Error accessing {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file exists but is not a valid settings document
    #[error("Malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Settings could not be serialized
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Another process held the settings lock for too long
    #[error("Timed out waiting for lock {0}")]
    LockTimeout(PathBuf),
}

impl SettingsError {
    /// Creates a Persistence error
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Creates an InvalidArgument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Errors that can occur when routing a price through the network
#[derive(Debug, Error)]
pub enum PriceNetworkError {
    /// No chain of markets connects the two symbols
    #[error("No path from {from} to {to}")]
    NoRoute { from: String, to: String },

    #[error("No such basket {0}")]
    UnknownBasket(String),

    /// A basket contains itself, directly or through other baskets
    #[error("Basket {name} references itself ({chain})")]
    CyclicBasket { name: String, chain: String },

    #[error("Invalid basket {name}: {reason}")]
    InvalidBasket { name: String, reason: String },

    /// Basket name shadows a symbol the quote source already trades
    #[error("Basket name {0} collides with a quoted symbol")]
    BasketConflict(String),

    /// Malformed "FROM/TO" pair string
    #[error("Invalid trade pair {0}")]
    Parse(String),

    /// Quote source failed to price a specific pair
    #[error("Quote failed for {pair}: {source}")]
    Quote {
        pair: String,
        #[source]
        source: QuoteError,
    },

    /// Quote source failed to list its symbols or markets
    #[error("Quote source error: {0}")]
    Source(#[source] QuoteError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl PriceNetworkError {
    /// Creates a NoRoute error
    pub fn no_route(from: impl ToString, to: impl ToString) -> Self {
        Self::NoRoute {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a Quote error for the given pair
    pub fn quote(pair: impl ToString, source: QuoteError) -> Self {
        Self::Quote {
            pair: pair.to_string(),
            source,
        }
    }

    /// Creates an InvalidBasket error
    pub fn invalid_basket(name: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidBasket {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = PriceNetworkError> = std::result::Result<T, E>;
