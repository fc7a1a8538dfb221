//! Failover orchestration across the provider set.
//!
//! One controller owns the provider attempt loop: walk providers in
//! priority order, skip the ones reported failing, bound each attempt
//! with a request timeout, and record every outcome against the health
//! tracker. The lowest-weight non-failing provider is published through
//! a watch channel as the "preferred" provider so that streaming
//! connections can follow REST health, and every change is also emitted
//! as a [`MarketEvent::ProviderSwitch`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};

use crate::errors::{FailureKind, MarketDataError, ProviderAttempt};
use crate::models::{MarketEvent, ProviderId, Quote};
use crate::provider::MarketDataProvider;
use crate::registry::{HealthTracker, ProviderRegistry};

/// Failover controller for REST quote lookups.
pub struct FailoverController {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    events: broadcast::Sender<MarketEvent>,
    preferred: watch::Sender<ProviderId>,
    request_timeout: Duration,
}

impl FailoverController {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        events: broadcast::Sender<MarketEvent>,
        request_timeout: Duration,
    ) -> Self {
        let initial = registry
            .providers_by_priority()
            .first()
            .map(|provider| ProviderId::from(provider.id()))
            .unwrap_or(ProviderId::Borrowed(""));
        let (preferred, _) = watch::channel(initial);

        Self {
            registry,
            health,
            events,
            preferred,
            request_timeout,
        }
    }

    /// Watch the preferred provider. The receiver sees the current value
    /// immediately and every subsequent change.
    pub fn preferred_provider(&self) -> watch::Receiver<ProviderId> {
        self.preferred.subscribe()
    }

    /// The current preferred provider id.
    pub fn current_preferred(&self) -> ProviderId {
        self.preferred.borrow().clone()
    }

    /// Fetch a quote, trying providers strictly in priority order.
    ///
    /// Failing providers are skipped. Terminal errors (unknown symbol)
    /// surface immediately without consulting further providers; provider
    /// faults are recorded and the next provider is tried. When no
    /// provider is eligible at all, one diagnostic call goes to the top
    /// provider so the aggregated error names a concrete root cause.
    pub async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let providers = self.registry.providers_by_priority();
        if providers.is_empty() {
            return Err(MarketDataError::NoProvidersAvailable);
        }

        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut tried_any = false;

        for provider in providers {
            if !self.health.is_eligible(provider.id()) {
                debug!("Skipping provider '{}' for {}: failing", provider.id(), symbol);
                continue;
            }
            tried_any = true;

            match self.attempt(provider.as_ref(), symbol).await {
                Ok(quote) => {
                    if self.health.record_success(provider.id()) {
                        self.refresh_preferred();
                    }
                    if !attempts.is_empty() {
                        info!(
                            "Served {} via '{}' after {} failed attempts",
                            symbol,
                            provider.id(),
                            attempts.len()
                        );
                    }
                    return Ok(quote);
                }
                Err(error) => match error.failure_kind() {
                    FailureKind::Terminal => return Err(error),
                    FailureKind::NotSupported => continue,
                    FailureKind::ProviderFault => {
                        warn!("Provider '{}' failed for {}: {}", provider.id(), symbol, error);
                        if self.health.record_failure(provider.id()) {
                            self.refresh_preferred();
                        }
                        attempts.push(ProviderAttempt {
                            provider: provider.id().to_string(),
                            error: error.to_string(),
                        });
                    }
                },
            }
        }

        if !tried_any {
            // Every provider is failing. One diagnostic call to the top
            // provider gives the aggregated error a concrete root cause;
            // its outcome is not held against the provider's health.
            let first = &providers[0];
            info!(
                "All providers failing; diagnostic call to '{}' for {}",
                first.id(),
                symbol
            );

            match self.attempt(first.as_ref(), symbol).await {
                Ok(quote) => {
                    if self.health.record_success(first.id()) {
                        self.refresh_preferred();
                    }
                    return Ok(quote);
                }
                Err(error) => {
                    if error.failure_kind() == FailureKind::Terminal {
                        return Err(error);
                    }
                    attempts.push(ProviderAttempt {
                        provider: first.id().to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }

        Err(MarketDataError::AllProvidersUnavailable {
            symbol: symbol.to_string(),
            attempts,
        })
    }

    /// One bounded attempt against one provider. A hung provider must
    /// not stall the failover loop.
    async fn attempt(
        &self,
        provider: &dyn MarketDataProvider,
        symbol: &str,
    ) -> Result<Quote, MarketDataError> {
        match tokio::time::timeout(self.request_timeout, provider.fetch_quote(symbol)).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                provider: provider.id().to_string(),
            }),
        }
    }

    /// Recompute the preferred provider (lowest weight not failing) and
    /// publish it if it changed. When every provider is failing the
    /// previous value is kept rather than publishing nothing.
    fn refresh_preferred(&self) {
        let candidate = self
            .registry
            .providers_by_priority()
            .iter()
            .find(|provider| !self.health.is_failing(provider.id()))
            .map(|provider| ProviderId::from(provider.id()));

        let Some(candidate) = candidate else {
            warn!(
                "Every provider is failing; keeping '{}' as preferred",
                self.current_preferred()
            );
            return;
        };

        let changed = *self.preferred.borrow() != candidate;
        if changed {
            info!("Preferred provider is now '{}'", candidate);
            self.preferred.send_replace(candidate.clone());
            let _ = self.events.send(MarketEvent::ProviderSwitch {
                provider: candidate,
                timestamp: Utc::now(),
            });
        }
    }
}
