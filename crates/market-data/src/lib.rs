//! Coinwatch Market Data Crate
//!
//! This crate aggregates cryptocurrency market data from multiple upstream
//! providers behind one provider-agnostic facade.
//!
//! # Overview
//!
//! The market data crate supports:
//! - REST quote lookups with priority-ordered provider failover
//! - Real-time tick streaming multiplexed across client subscriptions
//! - Consecutive-failure health tracking with cooldown-gated recovery
//! - TTL quote caching shared by the REST and streaming paths
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------------+
//! |     Gateway      | --> |   MarketDataService    |  (facade)
//! +------------------+     +------------------------+
//!                             |                  |
//!                        REST lookups      subscriptions
//!                             |                  |
//!                             v                  v
//!                  +--------------------+ +-------------------------+
//!                  | FailoverController | | SubscriptionMultiplexer |
//!                  +--------------------+ +-------------------------+
//!                             |                  |
//!                             +--------+---------+
//!                                      v
//!                             +------------------+
//!                             | ProviderRegistry |  (priority order)
//!                             +------------------+
//!                                      |
//!                                      v
//!                             +------------------+
//!                             |     Provider     |  (Binance, Kraken, ...)
//!                             +------------------+
//!                                      |
//!                                      v
//!                             +------------------+
//!                             |      Quote       |  (canonical tick)
//!                             +------------------+
//! ```
//!
//! Both the failover controller and the multiplexer consult the shared
//! [`HealthTracker`], so REST failures steer streaming connections away
//! from a failing provider and vice versa.
//!
//! # Core Types
//!
//! - [`Quote`] - Canonical market data quote with 24h statistics
//! - [`MarketEvent`] - Outward event: per-client price update or provider switch
//! - [`MarketDataError`] - Typed error split into terminal and provider-fault cases
//! - [`ProviderHealth`] - Point-in-time health snapshot for one provider
//! - [`MarketDataConfig`] - Service tuning knobs (TTL, timeouts, watchlist)
//!
//! # Type Aliases
//!
//! - [`ProviderId`] - Provider identifier (e.g., "BINANCE", "KRAKEN")
//! - [`ClientId`] - Opaque subscriber identity assigned by the gateway
//! - [`TickStream`] - Normalized quote stream from one upstream connection

pub mod cache;
pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;
pub mod service;
pub mod stream;

// Re-export all public types from models
pub use models::{ClientId, MarketEvent, ProviderId, Quote};

// Re-export error types
pub use errors::{FailureKind, MarketDataError, ProviderAttempt};

// Re-export cache types
pub use cache::QuoteCache;

// Re-export provider types
pub use provider::binance::BinanceProvider;
pub use provider::coinbase::CoinbaseProvider;
pub use provider::coingecko::CoinGeckoProvider;
pub use provider::cryptocompare::CryptoCompareProvider;
pub use provider::kraken::KrakenProvider;
pub use provider::{default_providers, MarketDataProvider, ProviderCapabilities, ProviderCredentials};

// Re-export registry types
pub use registry::{
    FailoverController, HealthConfig, HealthTracker, ProviderHealth, ProviderRegistry,
    ProviderStatus,
};

// Re-export service types
pub use service::{MarketDataConfig, MarketDataService, DEFAULT_WATCHLIST};

// Re-export stream types
pub use stream::{MultiplexerConfig, QuoteStream, SubscriptionMultiplexer, TickParser, TickStream};
