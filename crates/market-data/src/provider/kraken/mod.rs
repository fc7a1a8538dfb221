//! Kraken market data provider implementation.
//!
//! Last-resort source (weight 5):
//! - Quotes via the public /Ticker endpoint
//! - Live ticks via the v1 websocket ticker channel
//!
//! Kraken lists Bitcoin under its ISO-style code XBT and keys REST
//! results by internal pair names ("XXBTZUSD"), so both directions of
//! symbol translation live here. Websocket ticks arrive as positional
//! JSON arrays rather than tagged objects; channel management frames are
//! tagged objects carrying an `event` field.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::errors::MarketDataError;
use crate::models::Quote;
use crate::provider::{base_asset, MarketDataProvider, ProviderCapabilities};
use crate::stream::{QuoteStream, TickStream};

const BASE_URL: &str = "https://api.kraken.com/0/public";
const WS_URL: &str = "wss://ws.kraken.com";
const PROVIDER_ID: &str = "KRAKEN";

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, TickerInfo>,
}

/// Ticker statistics, shared by REST and websocket payloads.
///
/// Kraken packs each statistic into a positional array: `c` is
/// [last price, lot volume], while `v`/`h`/`l` are [today, last 24h].
#[derive(Debug, Deserialize)]
struct TickerInfo {
    c: Vec<String>,
    #[serde(default)]
    v: Vec<String>,
    #[serde(default)]
    h: Vec<String>,
    #[serde(default)]
    l: Vec<String>,
}

fn decimal_at(
    field: &'static str,
    values: &[String],
    index: usize,
) -> Result<Decimal, MarketDataError> {
    let raw = values
        .get(index)
        .ok_or_else(|| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("missing {}[{}]", field, index),
        })?;

    raw.parse().map_err(|_| MarketDataError::Normalization {
        provider: PROVIDER_ID.to_string(),
        message: format!("invalid {}: {}", field, raw),
    })
}

/// Collapse ticker statistics into the canonical quote. The 24h change
/// is not part of Kraken's ticker payload and stays unset.
fn normalize_ticker(symbol: &str, info: &TickerInfo) -> Result<Quote, MarketDataError> {
    Ok(Quote {
        symbol: symbol.to_string(),
        price: decimal_at("c", &info.c, 0)?,
        change_24h: None,
        volume_24h: Some(decimal_at("v", &info.v, 1)?),
        high_24h: Some(decimal_at("h", &info.h, 1)?),
        low_24h: Some(decimal_at("l", &info.l, 1)?),
        source: PROVIDER_ID.to_string(),
        timestamp: Utc::now(),
    })
}

/// Parse one websocket frame into a quote stamped with the canonical
/// symbol. Object frames (`systemStatus`, `subscriptionStatus`,
/// `heartbeat`) are channel management and yield `Ok(None)`; data frames
/// are arrays of [channel id, payload, channel name, pair].
fn parse_ticker_frame(symbol: &str, text: &str) -> Result<Option<Quote>, MarketDataError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("unexpected stream frame: {}", e),
        })?;

    if value.get("event").is_some() {
        return Ok(None);
    }

    let payload = match value.as_array().and_then(|entries| entries.get(1)) {
        Some(payload) => payload.clone(),
        None => return Ok(None),
    };

    let info: TickerInfo =
        serde_json::from_value(payload).map_err(|e| MarketDataError::Normalization {
            provider: PROVIDER_ID.to_string(),
            message: format!("unexpected ticker payload: {}", e),
        })?;

    normalize_ticker(symbol, &info).map(Some)
}

/// Map the in-band `error` list of a 200 response to a typed error.
fn check_api_errors(symbol: &str, errors: &[String]) -> Result<(), MarketDataError> {
    if errors.is_empty() {
        return Ok(());
    }

    let message = errors.join("; ");
    if message.contains("Unknown asset pair") {
        return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
    }

    Err(MarketDataError::Transport {
        provider: PROVIDER_ID.to_string(),
        message,
    })
}

/// Kraken's code for the base asset; Bitcoin trades as XBT.
fn kraken_base(symbol: &str) -> String {
    let base = base_asset(symbol).to_uppercase();
    if base == "BTC" {
        "XBT".to_string()
    } else {
        base
    }
}

// ============================================================================
// KrakenProvider
// ============================================================================

/// Kraken market data provider.
pub struct KrakenProvider {
    client: Client,
}

impl KrakenProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }

    /// GET /Ticker for one pair, mapping HTTP failures to typed errors.
    /// Application errors arrive in-band in the `error` list of a 200
    /// body and are handled by the caller.
    async fn fetch_ticker(&self, pair: &str) -> Result<String, MarketDataError> {
        let url = format!("{}/Ticker", BASE_URL);

        debug!(%pair, "kraken ticker request");

        let response = self
            .client
            .get(&url)
            .query(&[("pair", pair)])
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
}

impl Default for KrakenProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for KrakenProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn weight(&self) -> u8 {
        5
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::with_streaming()
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let pair = format!("{}USD", kraken_base(symbol));
        let text = self.fetch_ticker(&pair).await?;

        let envelope: TickerResponse =
            serde_json::from_str(&text).map_err(|e| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("unexpected ticker payload: {}", e),
            })?;

        check_api_errors(symbol, &envelope.error)?;

        // Results are keyed by Kraken's internal pair name ("XXBTZUSD");
        // a single-pair query returns a single entry.
        let info = envelope
            .result
            .into_values()
            .next()
            .ok_or_else(|| MarketDataError::Normalization {
                provider: PROVIDER_ID.to_string(),
                message: format!("empty result for pair {}", pair),
            })?;

        normalize_ticker(symbol, &info)
    }

    async fn open_stream(&self, symbol: &str) -> Result<TickStream, MarketDataError> {
        let handshake = serde_json::json!({
            "event": "subscribe",
            "pair": [format!("{}/USD", kraken_base(symbol))],
            "subscription": {"name": "ticker"},
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

    const TICKER_FIXTURE: &str = r#"{
        "error": [],
        "result": {
            "XXBTZUSD": {
                "a": ["62141.20000", "1", "1.000"],
                "b": ["62141.10000", "2", "2.000"],
                "c": ["62140.10000", "0.01000000"],
                "v": ["1201.55504885", "4321.93663224"],
                "p": ["62012.40127", "61873.46758"],
                "t": [21731, 63339],
                "l": ["61000.00000", "60950.50000"],
                "h": ["62900.00000", "63510.00000"],
                "o": "61750.00000"
            }
        }
    }"#;

    #[test]
    fn test_normalize_ticker() {
        let envelope: TickerResponse = serde_json::from_str(TICKER_FIXTURE).unwrap();
        let info = envelope.result.into_values().next().unwrap();
        let quote = normalize_ticker("BTCUSDT", &info).unwrap();

        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(62140.1));
        assert_eq!(quote.change_24h, None);
        assert_eq!(quote.volume_24h, Some(dec!(4321.93663224)));
        assert_eq!(quote.high_24h, Some(dec!(63510.0)));
        assert_eq!(quote.low_24h, Some(dec!(60950.5)));
        assert_eq!(quote.source, "KRAKEN");
    }

    #[test]
    fn test_normalize_ticker_rejects_short_arrays() {
        let info: TickerInfo = serde_json::from_str(r#"{"c":["62140.1"],"v":["100.0"]}"#).unwrap();
        let err = normalize_ticker("BTCUSDT", &info).unwrap_err();
        assert!(matches!(err, MarketDataError::Normalization { .. }));
    }

    #[test]
    fn test_parse_ticker_frame() {
        let frame = r#"[340,{"a":["62156.00000",0,"0.40000000"],"b":["62155.90000",1,"1.00000000"],"c":["62155.40000","0.00500000"],"v":["100.10000000","250.70000000"],"p":["62010.00000","61880.00000"],"t":[100,200],"l":["61500.00000","61200.00000"],"h":["62800.00000","63400.00000"],"o":["61750.00000","61700.00000"]},"ticker","XBT/USD"]"#;
        let quote = parse_ticker_frame("BTCUSDT", frame).unwrap().unwrap();

        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(62155.4));
        assert_eq!(quote.volume_24h, Some(dec!(250.7)));
        assert_eq!(quote.source, "KRAKEN");
    }

    #[test]
    fn test_parse_ticker_frame_skips_event_objects() {
        let heartbeat = r#"{"event":"heartbeat"}"#;
        assert!(parse_ticker_frame("BTCUSDT", heartbeat).unwrap().is_none());

        let status = r#"{"event":"subscriptionStatus","channelID":340,"channelName":"ticker","pair":"XBT/USD","status":"subscribed","subscription":{"name":"ticker"}}"#;
        assert!(parse_ticker_frame("BTCUSDT", status).unwrap().is_none());
    }

    #[test]
    fn test_unknown_pair_maps_to_symbol_not_found() {
        let errors = vec!["EQuery:Unknown asset pair".to_string()];
        let err = check_api_errors("FAKEUSD", &errors).unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound(symbol) if symbol == "FAKEUSD"));
    }

    #[test]
    fn test_service_error_maps_to_transport() {
        let errors = vec!["EService:Unavailable".to_string()];
        let err = check_api_errors("BTCUSDT", &errors).unwrap_err();
        assert!(matches!(err, MarketDataError::Transport { .. }));

        assert!(check_api_errors("BTCUSDT", &[]).is_ok());
    }

    #[test]
    fn test_kraken_base_translation() {
        assert_eq!(kraken_base("BTCUSDT"), "XBT");
        assert_eq!(kraken_base("ETHUSDT"), "ETH");
        assert_eq!(kraken_base("SOLUSD"), "SOL");
    }

    #[test]
    fn test_provider_metadata() {
        let provider = KrakenProvider::new();
        assert_eq!(provider.id(), "KRAKEN");
        assert_eq!(provider.weight(), 5);
        assert!(provider.capabilities().supports_streaming);
    }
}
