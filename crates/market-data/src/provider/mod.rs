//! Provider adapters for external market data sources.
//!
//! Each submodule wraps one upstream API behind the [`MarketDataProvider`]
//! trait: symbol translation, response normalization, and error mapping
//! stay inside the adapter so the rest of the crate only sees canonical
//! quotes and typed errors.
//!
//! Lower weight means higher priority when the registry orders providers:
//!
//! | Provider      | Weight | Streaming |
//! |---------------|--------|-----------|
//! | Binance       | 1      | yes       |
//! | CoinGecko     | 2      | no        |
//! | CryptoCompare | 3      | no        |
//! | Coinbase      | 4      | yes       |
//! | Kraken        | 5      | yes       |

use std::sync::Arc;

mod capabilities;
mod traits;

pub mod binance;
pub mod coinbase;
pub mod coingecko;
pub mod cryptocompare;
pub mod kraken;

pub use capabilities::ProviderCapabilities;
pub use traits::MarketDataProvider;

pub use binance::BinanceProvider;
pub use coinbase::CoinbaseProvider;
pub use coingecko::CoinGeckoProvider;
pub use cryptocompare::CryptoCompareProvider;
pub use kraken::KrakenProvider;

/// API credentials for providers that accept them. Every field is
/// optional; keyless operation falls back to free-tier rate limits.
#[derive(Clone, Debug, Default)]
pub struct ProviderCredentials {
    pub cryptocompare_api_key: Option<String>,
}

/// Strip the quote currency from a canonical pair symbol.
///
/// Canonical symbols are Binance style ("BTCUSDT", "ETHUSD"); most other
/// providers address coins by base asset alone.
pub(crate) fn base_asset(symbol: &str) -> &str {
    symbol
        .strip_suffix("USDT")
        .or_else(|| symbol.strip_suffix("USD"))
        .unwrap_or(symbol)
}

/// Build the full provider set in its default configuration.
pub fn default_providers(credentials: &ProviderCredentials) -> Vec<Arc<dyn MarketDataProvider>> {
    vec![
        Arc::new(BinanceProvider::new()),
        Arc::new(CoinGeckoProvider::new()),
        Arc::new(CryptoCompareProvider::new(
            credentials.cryptocompare_api_key.clone(),
        )),
        Arc::new(CoinbaseProvider::new()),
        Arc::new(KrakenProvider::new()),
    ]
}
