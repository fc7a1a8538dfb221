//! CryptoCompare market data provider implementation.
//!
//! Tertiary source (weight 3), REST only:
//! - Quotes via the /pricemultifull endpoint
//!
//! CryptoCompare addresses coins by base asset ("BTC" against "USD"), so
//! the canonical pair symbol is split before the request. Application
//! errors arrive as HTTP 200 bodies with a `Response: "Error"` marker.
//! An API key is optional for low volumes and sent as a query parameter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::MarketDataError;
use crate::models::Quote;
use crate::provider::{base_asset, MarketDataProvider, ProviderCapabilities};

const BASE_URL: &str = "https://min-api.cryptocompare.com/data";
const PROVIDER_ID: &str = "CRYPTOCOMPARE";

// ============================================================================
// API Response Structures
// ============================================================================

/// Envelope of a /pricemultifull response.
///
/// On success only `RAW` is present; on an application error the body is
/// still HTTP 200 but carries `Response: "Error"` plus a message.
#[derive(Debug, Deserialize)]
struct PriceMultiFull {
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "RAW")]
    raw: Option<HashMap<String, HashMap<String, RawTick>>>,
}

/// RAW.{FSYM}.{TSYM} block - plain JSON numbers
#[derive(Debug, Deserialize)]
struct RawTick {
    #[serde(rename = "PRICE")]
    price: Option<Decimal>,
    #[serde(rename = "CHANGEPCT24HOUR")]
    change_pct_24h: Option<Decimal>,
    #[serde(rename = "VOLUME24HOUR")]
    volume_24h: Option<Decimal>,
    #[serde(rename = "HIGH24HOUR")]
    high_24h: Option<Decimal>,
    #[serde(rename = "LOW24HOUR")]
    low_24h: Option<Decimal>,
}

/// Collapse a /pricemultifull response into the canonical quote.
fn normalize_price_multi_full(
    symbol: &str,
    base: &str,
    envelope: PriceMultiFull,
) -> Result<Quote, MarketDataError> {
    if envelope.response.as_deref() == Some("Error") {
        let message = envelope.message.unwrap_or_else(|| "unknown error".to_string());
        // "cccagg_or_exchange market does not exist for this coin pair"
        if message.contains("does not exist") {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        return Err(MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message,
        });
    }

    let tick = envelope
        .raw
        .and_then(|mut raw| raw.remove(base))
        .and_then(|mut by_quote| by_quote.remove("USD"))
        .ok_or_else(|| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("no RAW.{}.USD block in response", base),
        })?;

    let price = tick.price.ok_or_else(|| MarketDataError::Normalization {
        provider: PROVIDER_ID.to_string(),
        message: format!("missing PRICE for {}", base),
    })?;

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        change_24h: tick.change_pct_24h,
        volume_24h: tick.volume_24h,
        high_24h: tick.high_24h,
        low_24h: tick.low_24h,
        source: PROVIDER_ID.to_string(),
        timestamp: Utc::now(),
    })
}

// ============================================================================
// CryptoCompareProvider
// ============================================================================

/// CryptoCompare market data provider.
pub struct CryptoCompareProvider {
    client: Client,
    api_key: Option<String>,
}

impl CryptoCompareProvider {
    /// Create a new CryptoCompare provider. The API key is optional; the
    /// free tier accepts keyless requests at low volume.
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, api_key }
    }

    /// GET /pricemultifull for one base asset, mapping HTTP failures to
    /// typed errors.
    async fn fetch_price(&self, base: &str) -> Result<String, MarketDataError> {
        let url = format!("{}/pricemultifull", BASE_URL);

        debug!("CryptoCompare request: /pricemultifull fsyms={}", base);

        let mut request = self
            .client
            .get(&url)
            .query(&[("fsyms", base), ("tsyms", "USD")]);

        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
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
}

#[async_trait]
impl MarketDataProvider for CryptoCompareProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn weight(&self) -> u8 {
        3
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::rest_only()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let base = base_asset(symbol).to_uppercase();
        let text = self.fetch_price(&base).await?;

        let envelope: PriceMultiFull =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("unexpected price payload: {}", e),
            })?;

        normalize_price_multi_full(symbol, &base, envelope)
    }
}
