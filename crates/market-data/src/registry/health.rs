//! Per-provider health tracking for failover decisions.
//!
//! Every REST attempt reports its outcome here. A provider trips to
//! `Failing` after a run of consecutive failures and is skipped by the
//! failover loop until its probe cooldown lapses, at which point it is
//! reported as `Degraded` and becomes eligible for a trial attempt. One
//! success restores `Healthy`; one more failure trips it again.
//!
//! State is in-memory and resets on application restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Default number of consecutive failures before a provider trips.
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Default time a tripped provider sits out before a trial attempt.
const DEFAULT_PROBE_COOLDOWN: Duration = Duration::from_secs(60);

/// Reported health status of a provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderStatus {
    /// Normal operation.
    Healthy,
    /// Some strikes against it, or tripped but due for a trial attempt.
    Degraded,
    /// Tripped and inside the probe cooldown; skipped by failover.
    Failing,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Failing => write!(f, "Failing"),
        }
    }
}

/// Internal health record for a single provider.
#[derive(Debug)]
struct Health {
    /// Whether the failure threshold has been crossed.
    tripped: bool,
    /// Consecutive failures with no intervening success.
    consecutive_failures: u32,
    /// Time of the last recorded outcome.
    last_checked: Option<Instant>,
}

impl Health {
    fn new() -> Self {
        Self {
            tripped: false,
            consecutive_failures: 0,
            last_checked: None,
        }
    }

    /// Reported status. `Degraded` is derived, never stored: it covers
    /// a provider with strikes below the threshold as well as a tripped
    /// provider whose probe cooldown has lapsed.
    fn reported(&self, probe_cooldown: Duration) -> ProviderStatus {
        if self.tripped {
            match self.last_checked {
                Some(at) if at.elapsed() >= probe_cooldown => ProviderStatus::Degraded,
                _ => ProviderStatus::Failing,
            }
        } else if self.consecutive_failures > 0 {
            ProviderStatus::Degraded
        } else {
            ProviderStatus::Healthy
        }
    }
}

/// Health tracker configuration.
#[derive(Clone, Debug)]
pub struct HealthConfig {
    /// Consecutive failures before a provider trips to `Failing`.
    pub failure_threshold: u32,
    /// Time a tripped provider sits out before a trial attempt.
    pub probe_cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            probe_cooldown: DEFAULT_PROBE_COOLDOWN,
        }
    }
}

/// Point-in-time health snapshot for one provider.
#[derive(Clone, Debug)]
pub struct ProviderHealth {
    pub provider: String,
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub last_checked: Option<Instant>,
}

/// Thread-safe per-provider health map.
pub struct HealthTracker {
    entries: Mutex<HashMap<String, Health>>,
    config: HealthConfig,
}

impl HealthTracker {
    /// Create a tracker with default settings.
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create a tracker with custom configuration.
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the entries mutex, recovering from poison if necessary.
    ///
    /// Recovering is safe here: the worst case is a slightly stale
    /// health record, which beats panicking on the request path.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Health>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("Health tracker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Reported status for a provider. Unknown providers are healthy.
    pub fn status(&self, provider: &str) -> ProviderStatus {
        let entries = self.lock_entries();

        entries
            .get(provider)
            .map(|health| health.reported(self.config.probe_cooldown))
            .unwrap_or(ProviderStatus::Healthy)
    }

    /// Whether the failover loop may attempt this provider.
    pub fn is_eligible(&self, provider: &str) -> bool {
        self.status(provider) != ProviderStatus::Failing
    }

    /// Whether this provider is currently reported as failing.
    pub fn is_failing(&self, provider: &str) -> bool {
        self.status(provider) == ProviderStatus::Failing
    }

    /// Consecutive failure count for a provider.
    pub fn consecutive_failures(&self, provider: &str) -> u32 {
        let entries = self.lock_entries();

        entries
            .get(provider)
            .map(|health| health.consecutive_failures)
            .unwrap_or(0)
    }

    /// Record a successful attempt. Resets the failure counter and
    /// untrips the provider. Returns true when the provider was not
    /// healthy before, so the caller can recompute the preferred
    /// provider.
    pub fn record_success(&self, provider: &str) -> bool {
        let mut entries = self.lock_entries();

        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(Health::new);

        let before = entry.reported(self.config.probe_cooldown);
        entry.consecutive_failures = 0;
        entry.tripped = false;
        entry.last_checked = Some(Instant::now());

        if before != ProviderStatus::Healthy {
            info!("Provider '{}' recovered", provider);
            true
        } else {
            debug!("Provider '{}' success, counter stays at 0", provider);
            false
        }
    }

    /// Record a failed attempt. Returns true when this failure moved
    /// the provider into `Failing`, so the caller can recompute the
    /// preferred provider and emit a switch event.
    pub fn record_failure(&self, provider: &str) -> bool {
        let mut entries = self.lock_entries();

        let entry = entries
            .entry(provider.to_string())
            .or_insert_with(Health::new);

        let before = entry.reported(self.config.probe_cooldown);
        entry.consecutive_failures += 1;
        entry.last_checked = Some(Instant::now());
        if entry.consecutive_failures >= self.config.failure_threshold {
            entry.tripped = true;
        }
        let after = entry.reported(self.config.probe_cooldown);

        if after == ProviderStatus::Failing && before != ProviderStatus::Failing {
            info!(
                "Provider '{}' is failing after {} consecutive failures",
                provider, entry.consecutive_failures
            );
            true
        } else {
            debug!(
                "Provider '{}' failure {}/{}",
                provider, entry.consecutive_failures, self.config.failure_threshold
            );
            false
        }
    }

    /// Snapshot of every tracked provider.
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let entries = self.lock_entries();

        entries
            .iter()
            .map(|(provider, health)| ProviderHealth {
                provider: provider.clone(),
                status: health.reported(self.config.probe_cooldown),
                consecutive_failures: health.consecutive_failures,
                last_checked: health.last_checked,
            })
            .collect()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}
