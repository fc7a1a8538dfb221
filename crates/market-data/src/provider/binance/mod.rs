//! Binance market data provider implementation.
//!
//! Primary source (weight 1):
//! - Quotes via the /ticker/24hr endpoint
//! - Real-time trades via the per-symbol @trade stream
//!
//! Binance serves canonical exchange-pair symbols natively, so no symbol
//! translation is needed. Public market data requires no API key.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::errors::MarketDataError;
use crate::models::Quote;
use crate::provider::{MarketDataProvider, ProviderCapabilities};
use crate::stream::{QuoteStream, TickStream};

const BASE_URL: &str = "https://api.binance.com/api/v3";
const WS_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
const PROVIDER_ID: &str = "BINANCE";

/// Binance error code for an unknown trading pair.
const CODE_INVALID_SYMBOL: i64 = -1121;

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /ticker/24hr - numeric fields arrive as strings
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    last_price: String,
    price_change_percent: String,
    volume: String,
    high_price: String,
    low_price: String,
    /// Close of the rolling window, Unix millis
    close_time: Option<i64>,
}

/// Error body, e.g. {"code":-1121,"msg":"Invalid symbol."}
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    code: Option<i64>,
    msg: Option<String>,
}

/// Frame pushed on the @trade stream. Subscription acks and other
/// non-trade frames lack the `e` tag.
#[derive(Debug, Deserialize)]
struct TradeFrame {
    #[serde(rename = "e")]
    event: Option<String>,
    #[serde(rename = "p")]
    price: Option<String>,
    /// Trade time, Unix millis
    #[serde(rename = "T")]
    trade_time: Option<i64>,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, MarketDataError> {
    value
        .parse::<Decimal>()
        .map_err(|e| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("invalid {}: '{}' ({})", field, value, e),
        })
}

/// Collapse a /ticker/24hr response into the canonical quote.
fn normalize_ticker(symbol: &str, raw: &Ticker24h) -> Result<Quote, MarketDataError> {
    let timestamp = raw
        .close_time
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Quote {
        symbol: symbol.to_string(),
        price: parse_decimal("lastPrice", &raw.last_price)?,
        change_24h: Some(parse_decimal("priceChangePercent", &raw.price_change_percent)?),
        volume_24h: Some(parse_decimal("volume", &raw.volume)?),
        high_24h: Some(parse_decimal("highPrice", &raw.high_price)?),
        low_24h: Some(parse_decimal("lowPrice", &raw.low_price)?),
        source: PROVIDER_ID.to_string(),
        timestamp,
    })
}

/// Parse one @trade frame into a tick. Non-trade frames carry no tick.
fn parse_trade_frame(symbol: &str, frame: &str) -> Result<Option<Quote>, MarketDataError> {
    let trade: TradeFrame =
        serde_json::from_str(frame).map_err(|e| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("unparseable stream frame: {}", e),
        })?;

    if trade.event.as_deref() != Some("trade") {
        return Ok(None);
    }

    let price = trade
        .price
        .as_deref()
        .ok_or_else(|| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: "trade frame without price".to_string(),
        })?;

    let timestamp = trade
        .trade_time
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Some(Quote::new(
        symbol.to_string(),
        parse_decimal("p", price)?,
        PROVIDER_ID.to_string(),
        timestamp,
    )))
}

// ============================================================================
// BinanceProvider
// ============================================================================

/// Binance market data provider.
///
/// The preferred source: generous public rate limits and the canonical
/// symbol scheme the rest of the system uses.
pub struct BinanceProvider {
    client: Client,
}

impl BinanceProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    /// GET /ticker/24hr for one symbol, mapping HTTP failures to typed
    /// errors.
    async fn fetch_ticker(&self, symbol: &str) -> Result<String, MarketDataError> {
        let url = format!("{}/ticker/24hr", BASE_URL);

        debug!("Binance request: /ticker/24hr symbol={}", symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol)])
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

            if let Ok(error) = serde_json::from_str::<ErrorResponse>(&body) {
                if error.code == Some(CODE_INVALID_SYMBOL) {
                    return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
                }
                if let Some(msg) = error.msg {
                    return Err(MarketDataError::Transport {
                        provider: PROVIDER_ID.to_string(),
                        message: msg,
                    });
                }
            }

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

impl Default for BinanceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for BinanceProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn weight(&self) -> u8 {
        1
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::with_streaming()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let text = self.fetch_ticker(symbol).await?;

        let raw: Ticker24h =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("unexpected ticker payload: {}", e),
            })?;

        normalize_ticker(symbol, &raw)
    }

    async fn open_stream(&self, symbol: &str) -> Result<TickStream, MarketDataError> {
        let url = format!("{}/{}@trade", WS_BASE_URL, symbol.to_lowercase());
        let connection =
            QuoteStream::connect(PROVIDER_ID, symbol, &url, None, parse_trade_frame).await?;
        Ok(connection.into_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TICKER_FIXTURE: &str = r#"{
        "symbol": "BTCUSDT",
        "priceChange": "-94.99999800",
        "priceChangePercent": "-0.152",
        "lastPrice": "62150.00000200",
        "volume": "8913.30000000",
        "highPrice": "63100.00000000",
        "lowPrice": "61800.10000000",
        "openPrice": "62245.00000000",
        "closeTime": 1699869899040,
        "count": 76
    }"#;

    #[test]
    fn test_normalize_ticker() {
        let raw: Ticker24h = serde_json::from_str(TICKER_FIXTURE).unwrap();
        let quote = normalize_ticker("BTCUSDT", &raw).unwrap();

        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(62150.00000200));
        assert_eq!(quote.change_24h, Some(dec!(-0.152)));
        assert_eq!(quote.volume_24h, Some(dec!(8913.3)));
        assert_eq!(quote.high_24h, Some(dec!(63100)));
        assert_eq!(quote.low_24h, Some(dec!(61800.1)));
        assert_eq!(quote.source, "BINANCE");
        assert_eq!(quote.timestamp.timestamp_millis(), 1699869899040);
    }

    #[test]
    fn test_normalize_ticker_rejects_garbage_price() {
        let raw = Ticker24h {
            last_price: "not-a-number".to_string(),
            price_change_percent: "0.1".to_string(),
            volume: "1".to_string(),
            high_price: "1".to_string(),
            low_price: "1".to_string(),
            close_time: None,
        };
        let err = normalize_ticker("BTCUSDT", &raw).unwrap_err();
        assert!(matches!(err, MarketDataError::Normalization { .. }));
    }

    #[test]
    fn test_parse_trade_frame() {
        let frame = r#"{"e":"trade","E":1699869899041,"s":"BTCUSDT","t":12345,"p":"62151.01","q":"0.002","T":1699869899040,"m":true}"#;
        let quote = parse_trade_frame("BTCUSDT", frame).unwrap().unwrap();

        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(62151.01));
        assert_eq!(quote.source, "BINANCE");
        assert!(quote.change_24h.is_none());
    }

    #[test]
    fn test_parse_trade_frame_skips_subscription_ack() {
        let ack = r#"{"result":null,"id":1}"#;
        assert!(parse_trade_frame("BTCUSDT", ack).unwrap().is_none());
    }

    #[test]
    fn test_parse_trade_frame_rejects_garbage() {
        assert!(parse_trade_frame("BTCUSDT", "not json").is_err());
    }

    #[test]
    fn test_provider_metadata() {
        let provider = BinanceProvider::new();
        assert_eq!(provider.id(), "BINANCE");
        assert_eq!(provider.weight(), 1);
        assert!(provider.capabilities().supports_streaming);
    }
}
