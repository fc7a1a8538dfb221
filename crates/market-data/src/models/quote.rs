use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalized market data quote.
///
/// Produced by the per-provider normalizers; every provider's response
/// shape collapses into this one record. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Canonical exchange-pair symbol (e.g. "BTCUSDT")
    pub symbol: String,

    /// Last traded / spot price (required)
    pub price: Decimal,

    /// 24h change percent (optional - not all endpoints carry it)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<Decimal>,

    /// 24h traded volume (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<Decimal>,

    /// 24h high (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<Decimal>,

    /// 24h low (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<Decimal>,

    /// Source of the quote (BINANCE, COINGECKO, etc.)
    pub source: String,

    /// Observation timestamp
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Create a new quote with minimal required fields
    pub fn new(symbol: String, price: Decimal, source: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            change_24h: None,
            volume_24h: None,
            high_24h: None,
            low_24h: None,
            source,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_new() {
        let quote = Quote::new(
            "BTCUSDT".to_string(),
            dec!(62150.25),
            "BINANCE".to_string(),
            Utc::now(),
        );
        assert_eq!(quote.price, dec!(62150.25));
        assert_eq!(quote.symbol, "BTCUSDT");
        assert!(quote.change_24h.is_none());
        assert!(quote.high_24h.is_none());
    }

    #[test]
    fn test_quote_serialization_omits_absent_fields() {
        let quote = Quote::new(
            "ETHUSDT".to_string(),
            dec!(2000),
            "COINBASE".to_string(),
            Utc::now(),
        );
        let json = serde_json::to_string(&quote).unwrap();
        assert!(json.contains("\"symbol\":\"ETHUSDT\""));
        assert!(!json.contains("volume_24h"));
        assert!(!json.contains("high_24h"));
    }
}
