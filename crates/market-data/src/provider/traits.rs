//! Market data provider trait definitions.
//!
//! This module defines the core `MarketDataProvider` trait that all
//! upstream data sources implement.

use async_trait::async_trait;

use crate::errors::MarketDataError;
use crate::models::Quote;
use crate::stream::TickStream;

use super::capabilities::ProviderCapabilities;

/// Trait for market data providers.
///
/// Implement this trait to add support for a new upstream source. The
/// registry orders providers by [`weight`](Self::weight) and the failover
/// controller walks that order, so adding a provider never touches shared
/// control flow.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use coinwatch_market_data::provider::{MarketDataProvider, ProviderCapabilities};
///
/// struct MyExchange;
///
/// #[async_trait]
/// impl MarketDataProvider for MyExchange {
///     fn id(&self) -> &'static str {
///         "MY_EXCHANGE"
///     }
///
///     fn weight(&self) -> u8 {
///         7
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities::rest_only()
///     }
///
///     // ... implement fetch_quote
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier for this provider.
    ///
    /// Should be a constant string like "BINANCE", "COINGECKO", etc.
    /// Used for logging, health tracking, and quote attribution.
    fn id(&self) -> &'static str;

    /// Priority weight for ordering.
    ///
    /// Lower values are tried first; ties keep registration order.
    /// Cheaper or more trusted sources get lower weights. Default is 10.
    fn weight(&self) -> u8 {
        10
    }

    /// Describes what this provider can do.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Fetch and normalize the latest quote for a canonical symbol.
    ///
    /// Performs the network call and collapses the provider's native
    /// response shape into the canonical [`Quote`]: one round trip, one
    /// typed error on failure.
    ///
    /// # Arguments
    ///
    /// * `symbol` - Canonical exchange-pair symbol, uppercase (e.g.
    ///   "BTCUSDT"). Providers with a different native identifier scheme
    ///   translate it internally.
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;

    /// Open a real-time tick stream for a canonical symbol.
    ///
    /// The returned stream yields quotes already normalized to the same
    /// shape as the REST path, so downstream fan-out is provider-agnostic.
    /// Default implementation reports that streaming is not supported.
    async fn open_stream(&self, symbol: &str) -> Result<TickStream, MarketDataError> {
        let _ = symbol;
        Err(MarketDataError::StreamingNotSupported {
            provider: self.id().to_string(),
        })
    }
}
