//! Priority-ordered collection of the configured providers.

use std::sync::Arc;

use crate::provider::MarketDataProvider;

/// Immutable, weight-ordered view of the provider set.
///
/// Ordering happens once at construction; every consumer that walks the
/// providers sees the same sequence. A separate pre-filtered list keeps
/// the streaming path from re-checking capabilities on every lookup.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    streaming: Vec<Arc<dyn MarketDataProvider>>,
}

impl ProviderRegistry {
    /// Build a registry from an unordered provider set. Lower weight
    /// sorts first; equal weights keep their insertion order.
    pub fn new(mut providers: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        providers.sort_by_key(|provider| provider.weight());

        let streaming = providers
            .iter()
            .filter(|provider| provider.capabilities().supports_streaming)
            .cloned()
            .collect();

        Self {
            providers,
            streaming,
        }
    }

    /// All providers, best first.
    pub fn providers_by_priority(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.providers
    }

    /// Streaming-capable providers, best first.
    pub fn streaming_providers_by_priority(&self) -> &[Arc<dyn MarketDataProvider>] {
        &self.streaming
    }

    /// Look up a provider by id.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn MarketDataProvider>> {
        self.providers.iter().find(|provider| provider.id() == id)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MarketDataError;
    use crate::models::Quote;
    use crate::provider::ProviderCapabilities;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct MockProvider {
        id: &'static str,
        weight: u8,
        streaming: bool,
    }

    impl MockProvider {
        fn new(id: &'static str, weight: u8, streaming: bool) -> Self {
            Self {
                id,
                weight,
                streaming,
            }
        }
    }

    #[async_trait::async_trait]
    impl MarketDataProvider for MockProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn weight(&self) -> u8 {
            self.weight
        }

        fn capabilities(&self) -> ProviderCapabilities {
            if self.streaming {
                ProviderCapabilities::with_streaming()
            } else {
                ProviderCapabilities::rest_only()
            }
        }

        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
            Ok(Quote::new(
                symbol.to_string(),
                dec!(100),
                self.id.to_string(),
                Utc::now(),
            ))
        }
    }

    #[test]
    fn test_providers_ordered_by_weight() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(MockProvider::new("LAST_RESORT", 20, false)),
            Arc::new(MockProvider::new("PRIMARY", 1, true)),
            Arc::new(MockProvider::new("SECONDARY", 10, false)),
        ]);

        let ordered = registry.providers_by_priority();
        assert_eq!(ordered[0].id(), "PRIMARY");
        assert_eq!(ordered[1].id(), "SECONDARY");
        assert_eq!(ordered[2].id(), "LAST_RESORT");
    }

    #[test]
    fn test_equal_weights_keep_insertion_order() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(MockProvider::new("FIRST", 5, false)),
            Arc::new(MockProvider::new("SECOND", 5, false)),
        ]);

        let ordered = registry.providers_by_priority();
        assert_eq!(ordered[0].id(), "FIRST");
        assert_eq!(ordered[1].id(), "SECOND");
    }

    #[test]
    fn test_streaming_view_filters_and_keeps_order() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(MockProvider::new("REST_ONLY", 2, false)),
            Arc::new(MockProvider::new("STREAM_B", 4, true)),
            Arc::new(MockProvider::new("STREAM_A", 1, true)),
        ]);

        let streaming: Vec<&str> = registry
            .streaming_providers_by_priority()
            .iter()
            .map(|p| p.id())
            .collect();
        assert_eq!(streaming, vec!["STREAM_A", "STREAM_B"]);
    }

    #[test]
    fn test_get_by_id() {
        let registry = ProviderRegistry::new(vec![
            Arc::new(MockProvider::new("ALPHA", 1, false)),
            Arc::new(MockProvider::new("BETA", 2, false)),
        ]);

        assert!(registry.get("BETA").is_some());
        assert!(registry.get("GAMMA").is_none());
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }
}
