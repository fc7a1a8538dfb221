use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::quote::Quote;
use super::types::{ClientId, ProviderId};

/// Events emitted by the aggregation core for the gateway to relay.
///
/// Replaces an untyped publish/subscribe bus with a closed set of event
/// types so consumers can be statically checked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A normalized tick for one subscriber of a symbol. Emitted once per
    /// (subscriber, tick); the gateway routes it by `client_id`.
    PriceUpdate { client_id: ClientId, quote: Quote },

    /// The preferred provider changed after a health transition. Streaming
    /// connections are redirected toward `provider` on a best-effort basis.
    ProviderSwitch {
        provider: ProviderId,
        timestamp: DateTime<Utc>,
    },
}

impl MarketEvent {
    /// Symbol this event concerns, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::PriceUpdate { quote, .. } => Some(&quote.symbol),
            Self::ProviderSwitch { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_serialization_tags() {
        let event = MarketEvent::PriceUpdate {
            client_id: "c1".into(),
            quote: Quote::new(
                "BTCUSDT".to_string(),
                dec!(62000),
                "BINANCE".to_string(),
                Utc::now(),
            ),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"price_update\""));
        assert!(json.contains("\"client_id\":\"c1\""));

        let event = MarketEvent::ProviderSwitch {
            provider: "COINGECKO".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"provider_switch\""));
    }

    #[test]
    fn test_event_symbol() {
        let event = MarketEvent::ProviderSwitch {
            provider: "KRAKEN".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.symbol(), None);
    }
}
