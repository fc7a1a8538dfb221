//! Fan-out of provider tick streams to subscribed clients.
//!
//! One upstream connection per symbol, no matter how many clients are
//! subscribed. The multiplexer owns the subscription table and the
//! connection table behind a single mutex; reader tasks pull ticks off
//! the provider streams and publish them as [`MarketEvent::PriceUpdate`]
//! while refreshing the shared quote cache.
//!
//! Connection slots carry an epoch so that a reader, a teardown timer,
//! and a redirect racing each other can tell whether the slot still
//! belongs to them. Locks are never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::QuoteCache;
use crate::errors::MarketDataError;
use crate::models::{ClientId, MarketEvent, ProviderId, Quote};
use crate::provider::MarketDataProvider;
use crate::registry::{HealthTracker, ProviderRegistry};
use crate::stream::TickStream;

/// Default bound on opening one streaming connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default grace period between the last unsubscribe and teardown.
const DEFAULT_TEARDOWN_LINGER: Duration = Duration::from_secs(5);

/// Default pause before re-dialing after an upstream disconnect.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Multiplexer tuning knobs.
#[derive(Clone, Debug)]
pub struct MultiplexerConfig {
    /// Bound on opening one streaming connection.
    pub connect_timeout: Duration,
    /// Grace period between the last unsubscribe and teardown, so a
    /// quick resubscribe reuses the live connection.
    pub teardown_linger: Duration,
    /// Pause before re-dialing after an upstream disconnect.
    pub reconnect_delay: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            teardown_linger: DEFAULT_TEARDOWN_LINGER,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Connection slot for one symbol.
enum StreamSlot {
    /// A dial is in flight; the epoch pins which attempt owns the slot.
    Connecting { epoch: u64 },
    /// A live connection and its reader task.
    Active {
        provider: ProviderId,
        epoch: u64,
        cancel: CancellationToken,
    },
}

/// Subscription and connection tables, guarded by one mutex.
struct MuxState {
    /// symbol -> client -> subscribed-at
    subscribers: HashMap<String, HashMap<ClientId, DateTime<Utc>>>,
    /// symbol -> connection slot
    connections: HashMap<String, StreamSlot>,
    /// Monotonic counter distinguishing connection attempts.
    next_epoch: u64,
}

impl MuxState {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            connections: HashMap::new(),
            next_epoch: 0,
        }
    }

    fn claim_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    fn wanted(&self, symbol: &str) -> bool {
        self.subscribers
            .get(symbol)
            .map(|subs| !subs.is_empty())
            .unwrap_or(false)
    }
}

/// Shared-handle subscription multiplexer. Cloning is cheap; all clones
/// operate on the same tables.
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    cache: Arc<QuoteCache>,
    events: broadcast::Sender<MarketEvent>,
    state: Arc<Mutex<MuxState>>,
    config: MultiplexerConfig,
    shutdown: CancellationToken,
}

impl SubscriptionMultiplexer {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        cache: Arc<QuoteCache>,
        events: broadcast::Sender<MarketEvent>,
        config: MultiplexerConfig,
    ) -> Self {
        Self {
            registry,
            health,
            cache,
            events,
            state: Arc::new(Mutex::new(MuxState::new())),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Lock the tables, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("subscription table mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ========================================================================
    // Subscription lifecycle
    // ========================================================================

    /// Register a client's interest in a symbol. Opens a streaming
    /// connection if the symbol has none, waiting for the dial to settle
    /// before returning. Repeat calls for the same (client, symbol) pair
    /// are no-ops.
    pub async fn subscribe(&self, client_id: ClientId, symbol: &str) {
        let dial = {
            let mut state = self.lock_state();

            state
                .subscribers
                .entry(symbol.to_string())
                .or_default()
                .entry(client_id)
                .or_insert_with(Utc::now);

            if state.connections.contains_key(symbol) {
                None
            } else {
                let epoch = state.claim_epoch();
                state
                    .connections
                    .insert(symbol.to_string(), StreamSlot::Connecting { epoch });
                Some(epoch)
            }
        };

        if let Some(epoch) = dial {
            self.establish(symbol, epoch).await;
        }
    }

    /// Drop a client's interest in a symbol. When the last subscriber
    /// leaves, teardown of the connection is scheduled after a linger
    /// period and re-checked at teardown time.
    pub fn unsubscribe(&self, client_id: &str, symbol: &str) {
        let schedule_teardown = {
            let mut state = self.lock_state();

            let now_empty = match state.subscribers.get_mut(symbol) {
                Some(subs) => {
                    subs.remove(client_id);
                    subs.is_empty()
                }
                None => false,
            };
            if now_empty {
                state.subscribers.remove(symbol);
            }

            now_empty && state.connections.contains_key(symbol)
        };

        if schedule_teardown {
            debug!(%symbol, "last subscriber left, scheduling teardown");
            let mux = self.clone();
            let symbol = symbol.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(mux.config.teardown_linger).await;
                mux.teardown_if_idle(&symbol);
            });
        }
    }

    /// Drop every subscription a client holds, releasing connections
    /// whose last subscriber it was.
    pub fn disconnect_client(&self, client_id: &str) {
        let symbols: Vec<String> = {
            let state = self.lock_state();
            state
                .subscribers
                .iter()
                .filter(|(_, subs)| subs.contains_key(client_id))
                .map(|(symbol, _)| symbol.clone())
                .collect()
        };

        info!(client = %client_id, count = symbols.len(), "disconnecting client");
        for symbol in symbols {
            self.unsubscribe(client_id, &symbol);
        }
    }

    /// Cancel every reader and drop all subscription state.
    pub fn shutdown(&self) {
        info!("shutting down subscription multiplexer");
        self.shutdown.cancel();

        let mut state = self.lock_state();
        state.subscribers.clear();
        state.connections.clear();
    }

    // ========================================================================
    // Connection management
    // ========================================================================

    /// Dial streaming providers in priority order until one accepts,
    /// skipping providers that are currently failing. The reserved
    /// Connecting slot is either upgraded to Active or removed.
    async fn establish(&self, symbol: &str, epoch: u64) {
        let candidates: Vec<Arc<dyn MarketDataProvider>> = self
            .registry
            .streaming_providers_by_priority()
            .iter()
            .filter(|provider| !self.health.is_failing(provider.id()))
            .cloned()
            .collect();

        for provider in candidates {
            match self.try_open(provider.as_ref(), symbol).await {
                Ok(stream) => {
                    self.install(symbol, epoch, provider.id(), stream);
                    return;
                }
                Err(error) => {
                    debug!(
                        %symbol,
                        provider = provider.id(),
                        error = %error,
                        "stream dial failed"
                    );
                }
            }
        }

        warn!(%symbol, "no streaming provider accepted the connection");
        let mut state = self.lock_state();
        if matches!(
            state.connections.get(symbol),
            Some(StreamSlot::Connecting { epoch: e }) if *e == epoch
        ) {
            state.connections.remove(symbol);
        }
    }

    /// One bounded dial against one provider.
    async fn try_open(
        &self,
        provider: &dyn MarketDataProvider,
        symbol: &str,
    ) -> Result<TickStream, MarketDataError> {
        match tokio::time::timeout(self.config.connect_timeout, provider.open_stream(symbol)).await
        {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                provider: provider.id().to_string(),
            }),
        }
    }

    /// Upgrade a Connecting slot to Active and start the reader. The
    /// stream is discarded when the slot was reclaimed while dialing or
    /// every subscriber already left.
    fn install(&self, symbol: &str, epoch: u64, provider: &'static str, stream: TickStream) {
        let cancel = {
            let mut state = self.lock_state();

            let slot_matches = matches!(
                state.connections.get(symbol),
                Some(StreamSlot::Connecting { epoch: e }) if *e == epoch
            );

            if !slot_matches {
                debug!(%symbol, provider, "dial settled but the slot changed hands");
                return;
            }
            if !state.wanted(symbol) {
                debug!(%symbol, provider, "dial settled but every subscriber left");
                state.connections.remove(symbol);
                return;
            }

            let cancel = self.shutdown.child_token();
            state.connections.insert(
                symbol.to_string(),
                StreamSlot::Active {
                    provider: ProviderId::from(provider),
                    epoch,
                    cancel: cancel.clone(),
                },
            );
            cancel
        };

        info!(%symbol, provider, "stream connected");
        self.spawn_reader(symbol.to_string(), provider, epoch, cancel, stream);
    }

    /// Pump ticks until the stream ends or the slot is cancelled. An
    /// upstream disconnect releases the slot and, after a pause, makes
    /// one fresh establishment attempt if subscribers remain.
    fn spawn_reader(
        &self,
        symbol: String,
        provider: &'static str,
        epoch: u64,
        cancel: CancellationToken,
        mut stream: TickStream,
    ) {
        let mux = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(symbol = %symbol, provider, "stream reader cancelled");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(Ok(quote)) => mux.dispatch(&symbol, quote),
                        Some(Err(error)) => {
                            warn!(symbol = %symbol, provider, error = %error, "dropping bad tick");
                        }
                        None => break,
                    },
                }
            }

            warn!(symbol = %symbol, provider, "stream ended upstream");
            mux.clear_slot(&symbol, epoch);

            tokio::select! {
                _ = mux.shutdown.cancelled() => return,
                _ = tokio::time::sleep(mux.config.reconnect_delay) => {}
            }
            mux.reestablish_if_wanted(&symbol).await;
        });
    }

    /// Fan one tick out to every subscriber of the symbol and refresh
    /// the cache. A send failure only means nobody currently listens on
    /// the events channel.
    fn dispatch(&self, symbol: &str, quote: Quote) {
        self.cache.put(quote.clone());

        let clients: Vec<ClientId> = {
            let state = self.lock_state();
            state
                .subscribers
                .get(symbol)
                .map(|subs| subs.keys().cloned().collect())
                .unwrap_or_default()
        };

        for client_id in clients {
            let _ = self.events.send(MarketEvent::PriceUpdate {
                client_id,
                quote: quote.clone(),
            });
        }
    }

    /// Remove the symbol's slot if it still belongs to this attempt.
    fn clear_slot(&self, symbol: &str, epoch: u64) {
        let mut state = self.lock_state();

        let owned = match state.connections.get(symbol) {
            Some(StreamSlot::Connecting { epoch: e }) => *e == epoch,
            Some(StreamSlot::Active { epoch: e, .. }) => *e == epoch,
            None => false,
        };
        if owned {
            state.connections.remove(symbol);
        }
    }

    /// Fresh establishment attempt after an upstream disconnect, if any
    /// subscriber is still interested and nobody else re-dialed already.
    async fn reestablish_if_wanted(&self, symbol: &str) {
        let dial = {
            let mut state = self.lock_state();

            if !state.wanted(symbol) || state.connections.contains_key(symbol) {
                None
            } else {
                let epoch = state.claim_epoch();
                state
                    .connections
                    .insert(symbol.to_string(), StreamSlot::Connecting { epoch });
                Some(epoch)
            }
        };

        if let Some(epoch) = dial {
            info!(symbol = %symbol, "re-establishing stream");
            self.establish(symbol, epoch).await;
        }
    }

    /// Tear the connection down only if nobody re-subscribed during the
    /// linger window.
    fn teardown_if_idle(&self, symbol: &str) {
        let mut state = self.lock_state();

        if state.wanted(symbol) {
            debug!(%symbol, "teardown cancelled, a subscriber came back");
            return;
        }

        match state.connections.remove(symbol) {
            Some(StreamSlot::Active { cancel, .. }) => {
                info!(%symbol, "tearing down idle stream");
                cancel.cancel();
            }
            Some(slot @ StreamSlot::Connecting { .. }) => {
                // A dial is in flight; leave the slot in place and let
                // install() notice there are no subscribers left.
                state.connections.insert(symbol.to_string(), slot);
            }
            None => {}
        }
    }

    // ========================================================================
    // Provider-switch reaction
    // ========================================================================

    /// Follow a preferred-provider change: re-point live connections at
    /// the new provider and re-dial symbols that lost their connection
    /// entirely. Best effort; an existing connection keeps serving until
    /// its replacement is confirmed.
    pub async fn redirect_to(&self, preferred: &ProviderId) {
        // Connections only move when the new preferred provider can
        // stream itself; healing symbols without a connection works
        // either way, since establish() walks all streaming providers.
        let provider = self
            .registry
            .get(preferred)
            .filter(|provider| provider.capabilities().supports_streaming)
            .cloned();

        let (to_move, to_dial) = {
            let state = self.lock_state();

            let to_move: Vec<(String, u64)> = if provider.is_some() {
                state
                    .connections
                    .iter()
                    .filter_map(|(symbol, slot)| match slot {
                        StreamSlot::Active {
                            provider: current,
                            epoch,
                            ..
                        } if *current != *preferred => Some((symbol.clone(), *epoch)),
                        _ => None,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            let to_dial: Vec<String> = state
                .subscribers
                .iter()
                .filter(|(symbol, subs)| {
                    !subs.is_empty() && !state.connections.contains_key(*symbol)
                })
                .map(|(symbol, _)| symbol.clone())
                .collect();

            (to_move, to_dial)
        };

        if let Some(provider) = &provider {
            for (symbol, old_epoch) in to_move {
                match self.try_open(provider.as_ref(), &symbol).await {
                    Ok(stream) => self.swap_connection(&symbol, old_epoch, provider.id(), stream),
                    Err(error) => {
                        warn!(
                            symbol = %symbol,
                            provider = provider.id(),
                            error = %error,
                            "redirect failed, keeping current stream"
                        );
                    }
                }
            }
        }

        for symbol in to_dial {
            let dial = {
                let mut state = self.lock_state();
                if state.connections.contains_key(&symbol) {
                    None
                } else {
                    let epoch = state.claim_epoch();
                    state
                        .connections
                        .insert(symbol.clone(), StreamSlot::Connecting { epoch });
                    Some(epoch)
                }
            };
            if let Some(epoch) = dial {
                self.establish(&symbol, epoch).await;
            }
        }
    }

    /// Replace a live connection once its successor is ready. Skipped if
    /// the slot changed hands while the new connection was dialing.
    fn swap_connection(
        &self,
        symbol: &str,
        old_epoch: u64,
        provider: &'static str,
        stream: TickStream,
    ) {
        let handoff = {
            let mut state = self.lock_state();

            let matches_old = matches!(
                state.connections.get(symbol),
                Some(StreamSlot::Active { epoch, .. }) if *epoch == old_epoch
            );

            if !state.wanted(symbol) || !matches_old {
                None
            } else {
                let epoch = state.claim_epoch();
                let cancel = self.shutdown.child_token();
                let old = state.connections.insert(
                    symbol.to_string(),
                    StreamSlot::Active {
                        provider: ProviderId::from(provider),
                        epoch,
                        cancel: cancel.clone(),
                    },
                );
                Some((epoch, cancel, old))
            }
        };

        match handoff {
            Some((epoch, cancel, old)) => {
                if let Some(StreamSlot::Active {
                    cancel: old_cancel, ..
                }) = old
                {
                    old_cancel.cancel();
                }
                info!(%symbol, provider, "stream redirected");
                self.spawn_reader(symbol.to_string(), provider, epoch, cancel, stream);
            }
            None => {
                debug!(%symbol, "redirect abandoned, slot changed hands");
            }
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Number of clients subscribed to a symbol.
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        let state = self.lock_state();
        state
            .subscribers
            .get(symbol)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of connection slots (live or dialing).
    pub fn connection_count(&self) -> usize {
        self.lock_state().connections.len()
    }

    /// Whether a live connection exists for the symbol.
    pub fn is_connected(&self, symbol: &str) -> bool {
        matches!(
            self.lock_state().connections.get(symbol),
            Some(StreamSlot::Active { .. })
        )
    }

    /// Provider serving the symbol's live connection, if any.
    pub fn connected_provider(&self, symbol: &str) -> Option<ProviderId> {
        match self.lock_state().connections.get(symbol) {
            Some(StreamSlot::Active { provider, .. }) => Some(provider.clone()),
            _ => None,
        }
    }
}
