//! Coinbase market data provider implementation.
//!
//! Fourth source (weight 4):
//! - Spot prices via the v2 /prices endpoint
//! - Live ticks via the exchange websocket ticker channel
//!
//! The v2 spot endpoint returns the current price only, so quotes from
//! this provider carry no 24h statistics. Coinbase products are dash
//! separated ("BTC-USD"); translation from the canonical pair symbol is
//! mechanical and never consults a remote catalog.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::errors::MarketDataError;
use crate::models::Quote;
use crate::provider::{base_asset, MarketDataProvider, ProviderCapabilities};
use crate::stream::{QuoteStream, TickStream};

const BASE_URL: &str = "https://api.coinbase.com/v2";
const WS_URL: &str = "wss://ws-feed.pro.coinbase.com";
const PROVIDER_ID: &str = "COINBASE";

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct SpotPriceResponse {
    data: SpotPrice,
}

/// Spot price body; Coinbase serializes amounts as strings.
#[derive(Debug, Deserialize)]
struct SpotPrice {
    amount: String,
}

/// One frame from the websocket ticker channel. Non-ticker frames
/// (subscription acks, heartbeats) leave most fields unset.
#[derive(Debug, Deserialize)]
struct TickerFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    price: Option<String>,
    time: Option<DateTime<Utc>>,
}

fn parse_amount(value: &str) -> Result<rust_decimal::Decimal, MarketDataError> {
    value
        .parse()
        .map_err(|_| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("invalid amount: {}", value),
        })
}

/// Parse one websocket frame into a quote stamped with the canonical
/// symbol. Returns `Ok(None)` for acks and heartbeats.
fn parse_ticker_frame(symbol: &str, text: &str) -> Result<Option<Quote>, MarketDataError> {
    let frame: TickerFrame =
        serde_json::from_str(text).map_err(|e| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("unexpected stream frame: {}", e),
        })?;

    if frame.kind.as_deref() != Some("ticker") {
        return Ok(None);
    }

    let price = match frame.price {
        Some(raw) => parse_amount(&raw)?,
        None => return Ok(None),
    };
    let timestamp = frame.time.unwrap_or_else(Utc::now);

    Ok(Some(Quote::new(
        symbol.to_string(),
        price,
        PROVIDER_ID.to_string(),
        timestamp,
    )))
}

/// Map a canonical pair symbol to a Coinbase product id ("BTC-USD").
fn product_id(symbol: &str) -> String {
    format!("{}-USD", base_asset(symbol).to_uppercase())
}

// ============================================================================
// CoinbaseProvider
// ============================================================================

/// Coinbase market data provider.
pub struct CoinbaseProvider {
    client: Client,
}

impl CoinbaseProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    /// GET /prices/{product}/spot, mapping HTTP failures to typed errors.
    /// Unknown products come back as 404.
    async fn fetch_spot(&self, symbol: &str, product: &str) -> Result<String, MarketDataError> {
        let url = format!("{}/prices/{}/spot", BASE_URL, product);

        debug!(%product, "coinbase spot request");

        let response = self.client.get(&url).send().await.map_err(|e| {
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

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
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

impl Default for CoinbaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for CoinbaseProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn weight(&self) -> u8 {
        4
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::with_streaming()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let product = product_id(symbol);
        let text = self.fetch_spot(symbol, &product).await?;

        let envelope: SpotPriceResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("unexpected spot payload: {}", e),
            })?;

        Ok(Quote::new(
            symbol.to_string(),
            parse_amount(&envelope.data.amount)?,
            PROVIDER_ID.to_string(),
            Utc::now(),
        ))
    }

    async fn open_stream(&self, symbol: &str) -> Result<TickStream, MarketDataError> {
        let handshake = serde_json::json!({
            "type": "subscribe",
            "product_ids": [product_id(symbol)],
            "channels": ["ticker"],
        })
        .to_string();

        let stream = QuoteStream::connect(
            PROVIDER_ID,
            symbol,
            WS_URL,
            Some(handshake),
            parse_ticker_frame,
        )
        .await?;

        Ok(stream.into_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_spot_payload_parses() {
        let envelope: SpotPriceResponse = serde_json::from_str(
            r#"{"data":{"base":"BTC","currency":"USD","amount":"62151.37"}}"#,
        )
        .unwrap();
        assert_eq!(parse_amount(&envelope.data.amount).unwrap(), dec!(62151.37));
    }

    #[test]
    fn test_product_id_translation() {
        assert_eq!(product_id("BTCUSDT"), "BTC-USD");
        assert_eq!(product_id("ETHUSD"), "ETH-USD");
        assert_eq!(product_id("SOLUSDT"), "SOL-USD");
    }

    #[test]
    fn test_parse_ticker_frame() {
        let frame = r#"{
            "type": "ticker",
            "sequence": 1588,
            "product_id": "BTC-USD",
            "price": "62155.01",
            "time": "2024-05-01T12:30:45.123456Z"
        }"#;
        let quote = parse_ticker_frame("BTCUSDT", frame).unwrap().unwrap();

        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(62155.01));
        assert_eq!(quote.source, "COINBASE");
        assert_eq!(quote.change_24h, None);
    }

    #[test]
    fn test_parse_ticker_frame_skips_subscription_ack() {
        let ack = r#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#;
        assert!(parse_ticker_frame("BTCUSDT", ack).unwrap().is_none());
    }

    #[test]
    fn test_parse_ticker_frame_rejects_bad_price() {
        let frame = r#"{"type":"ticker","price":"not-a-number"}"#;
        assert!(matches!(
            parse_ticker_frame("BTCUSDT", frame),
            Err(MarketDataError::Normalization { .. })
        ));
    }

    #[test]
    fn test_provider_metadata() {
        let provider = CoinbaseProvider::new();
        assert_eq!(provider.id(), "COINBASE");
        assert_eq!(provider.weight(), 4);
        assert!(provider.capabilities().supports_streaming);
    }
}
