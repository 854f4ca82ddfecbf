//! Constants for the price network
//!
//! Compile-time defaults live here. Anything tunable at runtime is read from
//! the settings store options, seeded from the defaults below.

/// Environment variable naming the settings file
pub const SETTINGS_PATH_ENV: &str = "PRICE_NETWORK_SETTINGS";

/// Environment variable selecting the quote source ("coingecko", "hyperliquid" or "failover")
pub const SOURCE_ENV: &str = "PRICE_NETWORK_SOURCE";

/// Settings file used when the environment variable is unset
pub const DEFAULT_SETTINGS_FILE: &str = "price_network.json";

/// Written into every new settings file
pub const PROGRAM_URL: &str = "https://github.com/price-network/price-network";

/// Settings schema version
pub const SETTINGS_VERSION: &str = "0.1";

/// Option holding the cache freshness threshold (in seconds)
pub const PRICE_UPDATE_INTERVAL: &str = "price_update_interval";

/// Option holding the settings flush period (in seconds)
pub const SETTINGS_UPDATE_INTERVAL: &str = "settings_update_interval";

/// Default cache freshness threshold (in seconds)
pub const DEFAULT_PRICE_UPDATE_INTERVAL_SECS: u64 = 60;

/// Default settings flush period (in seconds)
pub const DEFAULT_SETTINGS_UPDATE_INTERVAL_SECS: u64 = 5 * 60;

/// How long to wait for the settings lock file before giving up (in seconds)
pub const LOCK_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Delay between lock file attempts (in milliseconds)
pub const LOCK_RETRY_MS: u64 = 50;

/// A lock file older than this is assumed abandoned (in seconds)
pub const STALE_LOCK_SECS: u64 = 60;

/// Capacity of the network event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// HTTP request timeout when fetching quotes (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko API endpoint for simple price queries
pub const COINGECKO_SIMPLE_PRICE_ENDPOINT: &str = "/simple/price";

/// Coins quoted by the default CoinGecko source (symbol, CoinGecko id)
pub const DEFAULT_COINGECKO_COINS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
];

/// Quote currencies of the default CoinGecko source
pub const DEFAULT_VS_CURRENCIES: &[&str] = &["USD", "EUR"];

/// Hyperliquid API base URL
pub const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz/info";

/// Coins quoted by the default Hyperliquid source
pub const DEFAULT_HYPERLIQUID_COINS: &[&str] = &["BTC", "ETH", "SOL"];

/// Hyperliquid mids are quoted in this symbol
pub const HYPERLIQUID_QUOTE_SYMBOL: &str = "USD";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "price-network/0.1.0";
