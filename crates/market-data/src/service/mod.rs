//! Market data service facade.
//!
//! `MarketDataService` wires the provider registry, health tracker,
//! failover controller, quote cache, and subscription multiplexer into a
//! single handle. A gateway constructs it once at startup and calls into
//! it for every quote lookup and subscription change; outward traffic
//! (ticks and provider switches) arrives on the broadcast channel returned
//! by [`events`](MarketDataService::events).
//!
//! Construction also spawns a small bridge task that watches the failover
//! controller's preferred provider and redirects live streams whenever it
//! changes, so the REST and streaming paths converge on the same upstream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::cache::QuoteCache;
use crate::errors::MarketDataError;
use crate::models::{ClientId, MarketEvent, ProviderId, Quote};
use crate::provider::{default_providers, MarketDataProvider, ProviderCredentials};
use crate::registry::{
    FailoverController, HealthConfig, HealthTracker, ProviderHealth, ProviderRegistry,
};
use crate::stream::{MultiplexerConfig, SubscriptionMultiplexer};

/// Symbols served by the market overview when no watchlist is configured.
pub const DEFAULT_WATCHLIST: [&str; 10] = [
    "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "DOGEUSDT", "XRPUSDT", "DOTUSDT", "UNIUSDT",
    "LINKUSDT", "SOLUSDT",
];

/// Tuning knobs for the market data service.
///
/// `Default` matches production settings; tests shrink the durations.
#[derive(Clone, Debug)]
pub struct MarketDataConfig {
    /// How long a cached quote stays fresh.
    pub cache_ttl: Duration,
    /// Bound on a single REST attempt against one provider.
    pub request_timeout: Duration,
    /// Bound on opening one streaming connection.
    pub connect_timeout: Duration,
    /// Grace period between the last unsubscribe and stream teardown.
    pub teardown_linger: Duration,
    /// Pause before re-dialing after an upstream stream closes.
    pub reconnect_delay: Duration,
    /// Consecutive failures before a provider is marked failing.
    pub failure_threshold: u32,
    /// How long a failing provider sits out before a trial request.
    pub probe_cooldown: Duration,
    /// Buffered capacity of the outward event channel.
    pub event_capacity: usize,
    /// Symbols served by [`get_market_overview`](MarketDataService::get_market_overview).
    pub watchlist: Vec<String>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            teardown_linger: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            failure_threshold: 3,
            probe_cooldown: Duration::from_secs(60),
            event_capacity: 256,
            watchlist: DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Facade over the whole market data pipeline.
///
/// Cheap to share behind an `Arc`; all interior state is already
/// synchronized.
pub struct MarketDataService {
    health: Arc<HealthTracker>,
    failover: FailoverController,
    cache: Arc<QuoteCache>,
    multiplexer: SubscriptionMultiplexer,
    events: broadcast::Sender<MarketEvent>,
    watchlist: Vec<String>,
}

impl MarketDataService {
    /// Build the service over an explicit provider set.
    ///
    /// Spawns the stream-redirect bridge task, so this must be called from
    /// within a Tokio runtime.
    pub fn new(providers: Vec<Arc<dyn MarketDataProvider>>, config: MarketDataConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::new(providers));
        let health = Arc::new(HealthTracker::with_config(HealthConfig {
            failure_threshold: config.failure_threshold,
            probe_cooldown: config.probe_cooldown,
        }));
        let cache = Arc::new(QuoteCache::with_ttl(config.cache_ttl));
        let (events, _) = broadcast::channel(config.event_capacity);

        let failover = FailoverController::new(
            registry.clone(),
            health.clone(),
            events.clone(),
            config.request_timeout,
        );
        let multiplexer = SubscriptionMultiplexer::new(
            registry,
            health.clone(),
            cache.clone(),
            events.clone(),
            MultiplexerConfig {
                connect_timeout: config.connect_timeout,
                teardown_linger: config.teardown_linger,
                reconnect_delay: config.reconnect_delay,
            },
        );

        // Streams follow REST health: when the preferred provider changes,
        // live connections are redirected toward it. The task ends once the
        // failover controller (and with it the watch sender) is dropped.
        let mut preferred = failover.preferred_provider();
        let mux = multiplexer.clone();
        tokio::spawn(async move {
            while preferred.changed().await.is_ok() {
                let target = preferred.borrow_and_update().clone();
                mux.redirect_to(&target).await;
            }
        });

        Self {
            health,
            failover,
            cache,
            multiplexer,
            events,
            watchlist: config.watchlist,
        }
    }

    /// Build the service over the standard provider set with default
    /// configuration.
    pub fn with_defaults(credentials: &ProviderCredentials) -> Self {
        Self::new(default_providers(credentials), MarketDataConfig::default())
    }

    /// Current quote for a symbol: cache first, then providers in priority
    /// order with failover.
    ///
    /// The symbol is canonicalized (trimmed, uppercased) before lookup, so
    /// `"btcusdt"` and `"BTCUSDT"` share one cache entry and one upstream
    /// connection.
    pub async fn get_price(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let symbol = canonical_symbol(symbol);

        if let Some(quote) = self.cache.get(&symbol) {
            debug!("Cache hit for {}", symbol);
            return Ok(quote);
        }

        let quote = self.failover.fetch_quote(&symbol).await?;
        self.cache.put(quote.clone());
        Ok(quote)
    }

    /// Best-effort quotes for the configured watchlist.
    ///
    /// Symbols are fetched concurrently; failed lookups are logged and
    /// omitted rather than failing the whole overview, and the result keeps
    /// watchlist order.
    pub async fn get_market_overview(&self) -> Vec<Quote> {
        let lookups = self.watchlist.iter().map(|symbol| self.get_price(symbol));
        let results = join_all(lookups).await;

        let mut quotes = Vec::with_capacity(self.watchlist.len());
        for (symbol, result) in self.watchlist.iter().zip(results) {
            match result {
                Ok(quote) => quotes.push(quote),
                Err(e) => warn!("Omitting {} from market overview: {}", symbol, e),
            }
        }
        quotes
    }

    /// Subscribe a client to live ticks for a symbol.
    ///
    /// Registration always succeeds; ticks arrive as
    /// [`MarketEvent::PriceUpdate`] tagged with the client id once an
    /// upstream connection is live.
    pub async fn subscribe(&self, client_id: impl Into<ClientId>, symbol: &str) {
        let symbol = canonical_symbol(symbol);
        self.multiplexer.subscribe(client_id.into(), &symbol).await;
    }

    /// Drop a client's interest in one symbol.
    pub fn unsubscribe(&self, client_id: &str, symbol: &str) {
        let symbol = canonical_symbol(symbol);
        self.multiplexer.unsubscribe(client_id, &symbol);
    }

    /// Drop every subscription a client holds, e.g. when its socket closes.
    pub fn disconnect_client(&self, client_id: &str) {
        self.multiplexer.disconnect_client(client_id);
    }

    /// Subscribe to the outward event stream.
    ///
    /// Carries price updates for subscribed clients and provider switch
    /// notices. Slow consumers lag (dropping oldest events) rather than
    /// blocking producers.
    pub fn events(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    /// Health snapshot for every provider that has served a request.
    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.health.snapshot()
    }

    /// The provider REST lookups currently prefer.
    pub fn preferred_provider(&self) -> ProviderId {
        self.failover.current_preferred()
    }

    /// Evict expired quotes, returning how many were dropped.
    pub fn purge_expired_quotes(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Number of quotes currently cached, including expired ones not yet
    /// purged.
    pub fn cached_quote_count(&self) -> usize {
        self.cache.len()
    }

    /// Close every streaming connection and drop all subscription state.
    pub fn shutdown(&self) {
        info!("Market data service shutting down");
        self.multiplexer.shutdown();
    }
}

/// Canonical symbol form used across cache, health, and subscriptions.
fn canonical_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use chrono::Utc;
    use futures_util::{stream, StreamExt};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio::time::{sleep, timeout};

    use crate::provider::ProviderCapabilities;
    use crate::registry::ProviderStatus;
    use crate::stream::TickStream;

    enum RestBehavior {
        Price(Decimal),
        Book(HashMap<&'static str, Decimal>),
        Reject,
    }

    struct MockProvider {
        id: &'static str,
        weight: u8,
        rest: RestBehavior,
        streaming: bool,
        ticks: Mutex<Vec<Quote>>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn rest_only(id: &'static str, weight: u8, rest: RestBehavior) -> Arc<Self> {
            Arc::new(Self {
                id,
                weight,
                rest,
                streaming: false,
                ticks: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn streaming(id: &'static str, weight: u8, rest: RestBehavior, ticks: Vec<Quote>) -> Arc<Self> {
            Arc::new(Self {
                id,
                weight,
                rest,
                streaming: true,
                ticks: Mutex::new(ticks),
                calls: AtomicUsize::new(0),
            })
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.rest {
                RestBehavior::Price(price) => Ok(Quote::new(
                    symbol.to_string(),
                    *price,
                    self.id.to_string(),
                    Utc::now(),
                )),
                RestBehavior::Book(prices) => match prices.get(symbol) {
                    Some(price) => Ok(Quote::new(
                        symbol.to_string(),
                        *price,
                        self.id.to_string(),
                        Utc::now(),
                    )),
                    None => Err(MarketDataError::SymbolNotFound(symbol.to_string())),
                },
                RestBehavior::Reject => Err(MarketDataError::Transport {
                    provider: self.id.to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }

        async fn open_stream(&self, _symbol: &str) -> Result<TickStream, MarketDataError> {
            if !self.streaming {
                return Err(MarketDataError::StreamingNotSupported {
                    provider: self.id.to_string(),
                });
            }
            let ticks = std::mem::take(&mut *self.ticks.lock().unwrap());
            Ok(stream::iter(ticks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed())
        }
    }

    fn tick(symbol: &str, price: Decimal, source: &str) -> Quote {
        Quote::new(symbol.to_string(), price, source.to_string(), Utc::now())
    }

    fn fast_config(watchlist: &[&str]) -> MarketDataConfig {
        MarketDataConfig {
            request_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(200),
            teardown_linger: Duration::from_millis(20),
            reconnect_delay: Duration::from_millis(10),
            watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
            ..MarketDataConfig::default()
        }
    }

    async fn recv_event(rx: &mut broadcast::Receiver<MarketEvent>) -> MarketEvent {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_get_price_canonicalizes_and_caches() {
        let provider = MockProvider::rest_only("A", 1, RestBehavior::Price(dec!(50000)));
        let service = MarketDataService::new(vec![provider.clone()], fast_config(&[]));

        let quote = service.get_price(" btcusdt ").await.unwrap();
        assert_eq!(quote.symbol, "BTCUSDT");
        assert_eq!(quote.price, dec!(50000));
        assert_eq!(quote.source, "A");

        // Second lookup is served from cache.
        let cached = service.get_price("BTCUSDT").await.unwrap();
        assert_eq!(cached.price, dec!(50000));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.cached_quote_count(), 1);
    }

    #[tokio::test]
    async fn test_get_price_fails_over_and_emits_switch() {
        let primary = MockProvider::rest_only("A", 1, RestBehavior::Reject);
        let fallback = MockProvider::rest_only("B", 2, RestBehavior::Price(dec!(3000)));
        let service = MarketDataService::new(vec![primary, fallback], fast_config(&[]));
        let mut rx = service.events();

        assert_eq!(service.preferred_provider(), ProviderId::from("A"));

        // Distinct symbols so every lookup reaches the providers.
        for symbol in ["AAAUSD", "BBBUSD", "CCCUSD"] {
            let quote = service.get_price(symbol).await.unwrap();
            assert_eq!(quote.source, "B");
        }

        // Third consecutive failure trips A and switches preference to B.
        match recv_event(&mut rx).await {
            MarketEvent::ProviderSwitch { provider, .. } => {
                assert_eq!(provider, ProviderId::from("B"));
            }
            other => panic!("expected provider switch, got {:?}", other),
        }
        assert_eq!(service.preferred_provider(), ProviderId::from("B"));

        let health = service.provider_health();
        let primary_health = health.iter().find(|h| h.provider == "A").unwrap();
        assert_eq!(primary_health.status, ProviderStatus::Failing);
        assert_eq!(primary_health.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_market_overview_preserves_order_and_omits_failures() {
        let mut prices = HashMap::new();
        prices.insert("BTCUSDT", dec!(50000));
        prices.insert("ETHUSDT", dec!(3000));
        let provider = MockProvider::rest_only("A", 1, RestBehavior::Book(prices));
        let service = MarketDataService::new(
            vec![provider],
            fast_config(&["BTCUSDT", "FAKEUSD", "ETHUSDT"]),
        );

        let overview = service.get_market_overview().await;

        let symbols: Vec<&str> = overview.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn test_subscribe_streams_ticks_to_events() {
        let provider = MockProvider::streaming(
            "S",
            1,
            RestBehavior::Price(dec!(50000)),
            vec![tick("BTCUSDT", dec!(50001), "S")],
        );
        let service = MarketDataService::new(vec![provider], fast_config(&[]));
        let mut rx = service.events();

        service.subscribe("c1", "btcusdt").await;

        match recv_event(&mut rx).await {
            MarketEvent::PriceUpdate { client_id, quote } => {
                assert_eq!(&*client_id, "c1");
                assert_eq!(quote.symbol, "BTCUSDT");
                assert_eq!(quote.price, dec!(50001));
            }
            other => panic!("expected price update, got {:?}", other),
        }

        // Ticks also land in the cache for REST lookups.
        assert_eq!(service.cached_quote_count(), 1);

        service.unsubscribe("c1", "BTCUSDT");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(service.multiplexer.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_switch_redirects_live_streams() {
        let primary = MockProvider::streaming("A", 1, RestBehavior::Reject, Vec::new());
        let fallback =
            MockProvider::streaming("B", 2, RestBehavior::Price(dec!(3000)), Vec::new());
        let service = MarketDataService::new(vec![primary, fallback], fast_config(&[]));

        service.subscribe("c1", "BTCUSDT").await;
        assert_eq!(
            service.multiplexer.connected_provider("BTCUSDT").as_deref(),
            Some("A")
        );

        // Three REST failures trip A; the bridge task then moves the live
        // stream onto the new preferred provider.
        for symbol in ["AAAUSD", "BBBUSD", "CCCUSD"] {
            let _ = service.get_price(symbol).await;
        }

        let mut redirected = None;
        for _ in 0..100 {
            redirected = service.multiplexer.connected_provider("BTCUSDT");
            if redirected.as_deref() == Some("B") {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(redirected.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_disconnect_client_releases_all_subscriptions() {
        let provider = MockProvider::streaming(
            "S",
            1,
            RestBehavior::Price(dec!(1)),
            Vec::new(),
        );
        let service = MarketDataService::new(vec![provider], fast_config(&[]));

        service.subscribe("c1", "BTCUSDT").await;
        service.subscribe("c1", "ETHUSDT").await;
        assert_eq!(service.multiplexer.connection_count(), 2);

        service.disconnect_client("c1");
        assert_eq!(service.multiplexer.subscriber_count("BTCUSDT"), 0);
        assert_eq!(service.multiplexer.subscriber_count("ETHUSDT"), 0);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(service.multiplexer.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_connections() {
        let provider = MockProvider::streaming(
            "S",
            1,
            RestBehavior::Price(dec!(1)),
            Vec::new(),
        );
        let service = MarketDataService::new(vec![provider], fast_config(&[]));

        service.subscribe("c1", "BTCUSDT").await;
        assert_eq!(service.multiplexer.connection_count(), 1);

        service.shutdown();
        assert_eq!(service.multiplexer.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_health_snapshot_reflects_single_failure() {
        let primary = MockProvider::rest_only("A", 1, RestBehavior::Reject);
        let fallback = MockProvider::rest_only("B", 2, RestBehavior::Price(dec!(10)));
        let service = MarketDataService::new(vec![primary, fallback], fast_config(&[]));

        service.get_price("AAAUSD").await.unwrap();

        let health = service.provider_health();
        let a = health.iter().find(|h| h.provider == "A").unwrap();
        let b = health.iter().find(|h| h.provider == "B").unwrap();
        assert_eq!(a.status, ProviderStatus::Degraded);
        assert_eq!(a.consecutive_failures, 1);
        assert_eq!(b.status, ProviderStatus::Healthy);
        assert_eq!(b.consecutive_failures, 0);
    }
}
