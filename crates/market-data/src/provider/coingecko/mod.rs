//! CoinGecko market data provider implementation.
//!
//! Secondary source (weight 2), REST only:
//! - Quotes via the /simple/price endpoint
//! - Symbol translation via the /coins/list catalog
//!
//! CoinGecko addresses coins by an internal id ("bitcoin"), not by
//! exchange pair, so every lookup first translates the canonical symbol.
//! The translation map is built lazily on first use and kept for the
//! process lifetime; a short list of top coins is resolved from a built-in
//! table without touching the network, which also shields them from the
//! duplicate-ticker noise in the full catalog.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, info};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::errors::MarketDataError;
use crate::models::Quote;
use crate::provider::{base_asset, MarketDataProvider, ProviderCapabilities};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";
const PROVIDER_ID: &str = "COINGECKO";

lazy_static! {
    /// Known-good ids for the most traded coins. The full /coins/list
    /// catalog contains many duplicate tickers, so these never go through
    /// it.
    static ref COMMON_COINS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("BTC", "bitcoin");
        m.insert("ETH", "ethereum");
        m.insert("USDT", "tether");
        m.insert("BNB", "binancecoin");
        m.insert("SOL", "solana");
        m.insert("XRP", "ripple");
        m.insert("USDC", "usd-coin");
        m.insert("ADA", "cardano");
        m.insert("DOGE", "dogecoin");
        m.insert("TRX", "tron");
        m.insert("DOT", "polkadot");
        m.insert("MATIC", "matic-network");
        m.insert("DAI", "dai");
        m.insert("LTC", "litecoin");
        m.insert("BCH", "bitcoin-cash");
        m.insert("LINK", "chainlink");
        m.insert("SHIB", "shiba-inu");
        m.insert("ATOM", "cosmos");
        m.insert("XLM", "stellar");
        m.insert("UNI", "uniswap");
        m.insert("AVAX", "avalanche-2");
        m.insert("ETC", "ethereum-classic");
        m.insert("FIL", "filecoin");
        m.insert("NEAR", "near");
        m.insert("APE", "apecoin");
        m.insert("ALGO", "algorand");
        m.insert("VET", "vechain");
        m.insert("ICP", "internet-computer");
        m.insert("MANA", "decentraland");
        m.insert("SAND", "the-sandbox");
        m
    };
}

// ============================================================================
// API Response Structures
// ============================================================================

/// One entry of the /coins/list catalog
#[derive(Debug, Deserialize)]
struct CoinListItem {
    id: String,
    symbol: String,
}

/// Per-coin block of a /simple/price response - plain JSON numbers
#[derive(Debug, Deserialize)]
struct SimplePrice {
    usd: Option<Decimal>,
    usd_24h_change: Option<Decimal>,
    usd_24h_vol: Option<Decimal>,
}

/// Collapse a /simple/price block into the canonical quote.
///
/// CoinGecko answers 200 with an empty object (or an empty per-coin
/// block) for an id it cannot price, so a missing block or usd field is
/// an unknown symbol, not a malformed payload. High/low are not part of
/// this endpoint and stay unset.
fn normalize_simple_price(
    symbol: &str,
    coin_id: &str,
    mut payload: HashMap<String, SimplePrice>,
) -> Result<Quote, MarketDataError> {
    let block = payload
        .remove(coin_id)
        .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

    let price = block
        .usd
        .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        change_24h: block.usd_24h_change,
        volume_24h: block.usd_24h_vol,
        high_24h: None,
        low_24h: None,
        source: PROVIDER_ID.to_string(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// CoinGeckoProvider
// ============================================================================

/// CoinGecko market data provider.
pub struct CoinGeckoProvider {
    client: Client,
    /// Uppercase base asset -> CoinGecko id, built from /coins/list on
    /// first miss of the built-in table.
    coin_ids: OnceCell<HashMap<String, String>>,
}

impl CoinGeckoProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            coin_ids: OnceCell::new(),
        }
    }

    /// Make a GET request to the CoinGecko API.
    async fn fetch(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        let url = format!("{}{}", BASE_URL, endpoint);

        debug!("CoinGecko request: {}", endpoint);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MarketDataError::Timeout {
                        provider: PROVIDER_ID.to_string(),
                    }
                } else {
                    MarketDataError::Transport {
                        provider: PROVIDER_ID.to_string(),
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketDataError::RateLimited {
                provider: PROVIDER_ID.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::Transport {
                provider: PROVIDER_ID.to_string(),
                message: format!("HTTP {} - {}", status, body),
            });
        }

        response
            .text()
            .await
            .map_err(|e| MarketDataError::Transport {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to read response: {}", e),
            })
    }

    /// Translate a canonical symbol ("BTCUSDT") to a CoinGecko id
    /// ("bitcoin").
    ///
    /// A miss in both the built-in table and the fetched catalog is a
    /// [`MarketDataError::SymbolTranslation`] so the failover controller
    /// never retries a doomed translation against this provider.
    async fn coin_id(&self, symbol: &str) -> Result<String, MarketDataError> {
        let base = base_asset(symbol).to_uppercase();

        if let Some(id) = COMMON_COINS.get(base.as_str()) {
            return Ok((*id).to_string());
        }

        let catalog = self
            .coin_ids
            .get_or_try_init(|| self.fetch_coin_catalog())
            .await?;

        catalog
            .get(&base)
            .cloned()
            .ok_or_else(|| MarketDataError::SymbolTranslation {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            })
    }

    /// Download /coins/list and index it by uppercase ticker. For
    /// duplicate tickers the first catalog entry wins.
    async fn fetch_coin_catalog(&self) -> Result<HashMap<String, String>, MarketDataError> {
        let text = self.fetch("/coins/list", &[]).await?;

        let coins: Vec<CoinListItem> =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("unexpected coins list payload: {}", e),
            })?;

        let mut catalog = HashMap::with_capacity(coins.len());
        for coin in coins {
            catalog.entry(coin.symbol.to_uppercase()).or_insert(coin.id);
        }

        info!("CoinGecko coin catalog loaded ({} tickers)", catalog.len());
        Ok(catalog)
    }
}

impl Default for CoinGeckoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn weight(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::rest_only()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let coin_id = self.coin_id(symbol).await?;

        let text = self
            .fetch(
                "/simple/price",
                &[
                    ("ids", coin_id.as_str()),
                    ("vs_currencies", "usd"),
                    ("include_24hr_change", "true"),
                    ("include_24hr_vol", "true"),
                ],
            )
            .await?;

        let payload: HashMap<String, SimplePrice> =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("unexpected price payload: {}", e),
            })?;

        normalize_simple_price(symbol, &coin_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalize_simple_price() {
        let payload: HashMap<String, SimplePrice> = serde_json::from_str(
            r#"{"bitcoin":{"usd":62150.5,"usd_24h_change":-0.152,"usd_24h_vol":28714.0}}"#,
        )
        .unwrap();
        let quote = normalize_simple_price("BTCUSDT", "bitcoin", payload).unwrap();

        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(62150.5));
        assert_eq!(quote.change_24h, Some(dec!(-0.152)));
        assert_eq!(quote.volume_24h, Some(dec!(28714.0)));
        assert!(quote.high_24h.is_none());
        assert!(quote.low_24h.is_none());
        assert_eq!(quote.source, "COINGECKO");
    }

    #[test]
    fn test_unpriced_id_maps_to_symbol_not_found() {
        // An id CoinGecko cannot price comes back as a 200 with `{}`.
        let payload: HashMap<String, SimplePrice> = serde_json::from_str("{}").unwrap();
        let err = normalize_simple_price("XYZUSDT", "xyz-coin", payload).unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound(symbol) if symbol == "XYZUSDT"));

        // Same for a listed coin with no usd quote in its block.
        let payload: HashMap<String, SimplePrice> =
            serde_json::from_str(r#"{"xyz-coin":{}}"#).unwrap();
        let err = normalize_simple_price("XYZUSDT", "xyz-coin", payload).unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound(symbol) if symbol == "XYZUSDT"));
    }

    #[test]
    fn test_common_coins_cover_the_watchlist() {
        for base in [
            "BTC", "ETH", "BNB", "ADA", "DOGE", "XRP", "DOT", "UNI", "LINK", "SOL",
        ] {
            assert!(COMMON_COINS.contains_key(base), "missing {}", base);
        }
        assert_eq!(COMMON_COINS.get("BTC"), Some(&"bitcoin"));
    }

    #[test]
    fn test_provider_metadata() {
        let provider = CoinGeckoProvider::new();
        assert_eq!(provider.id(), "COINGECKO");
        assert_eq!(provider.weight(), 2);
        assert!(!provider.capabilities().supports_streaming);
    }
}
