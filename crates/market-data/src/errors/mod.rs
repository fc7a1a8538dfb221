//! Error types and failure classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all market data operations
//! - [`FailureKind`]: Classification for determining failover behavior
//! - [`ProviderAttempt`]: Per-provider failure record carried by the
//!   aggregated error

mod classify;

pub use classify::FailureKind;

use serde::Serialize;
use thiserror::Error;

/// Record of one failed provider attempt.
///
/// Collected by the failover controller so the aggregated
/// [`MarketDataError::AllProvidersUnavailable`] names every provider tried
/// and what went wrong with each.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderAttempt {
    /// The provider that was tried
    pub provider: String,
    /// The error it produced, rendered for diagnostics
    pub error: String,
}

fn attempts_summary(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no provider was attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur during market data operations.
///
/// Each variant is classified into a [`FailureKind`] via the
/// [`failure_kind`](Self::failure_kind) method, which determines how the
/// failover controller handles the error.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// No provider recognizes the requested symbol.
    /// This is a terminal error - retrying or failing over won't help.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// A network-level failure while talking to a provider
    /// (connection refused, TLS failure, non-2xx status).
    /// Absorbed by failover, never surfaced raw to the caller.
    #[error("Transport error: {provider} - {message}")]
    Transport {
        /// The provider the request was sent to
        provider: String,
        /// What the transport reported
        message: String,
    },

    /// The request to the provider timed out.
    /// A hung provider must not stall failover; counts as a failure.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
    },

    /// The provider answered, but its payload could not be turned into a
    /// canonical quote. Treated as a provider failure.
    #[error("Normalization failed: {provider} - {message}")]
    Normalization {
        /// The provider whose payload was malformed
        provider: String,
        /// What was wrong with the payload
        message: String,
    },

    /// The provider has no native identifier for this symbol.
    /// A normalization-class failure, kept distinct so a doomed
    /// translation is never retried against the same provider.
    #[error("No {provider} listing for symbol {symbol}")]
    SymbolTranslation {
        /// The provider whose identifier scheme has no mapping
        provider: String,
        /// The canonical symbol that could not be translated
        symbol: String,
    },

    /// The provider has no streaming endpoint.
    /// Skipped by the multiplexer without a health penalty.
    #[error("Streaming not supported: {provider}")]
    StreamingNotSupported {
        /// The provider without streaming support
        provider: String,
    },

    /// The registry is empty - nothing to try.
    #[error("No providers available")]
    NoProvidersAvailable,

    /// Every eligible provider failed for this attempt.
    /// Carries the chain of per-provider errors for diagnostics.
    #[error("All providers unavailable for {symbol}: {}", attempts_summary(.attempts))]
    AllProvidersUnavailable {
        /// The symbol being fetched
        symbol: String,
        /// Every provider tried, in order, with its failure
        attempts: Vec<ProviderAttempt>,
    },
}

impl MarketDataError {
    /// Returns the failure classification for this error.
    ///
    /// This classification determines how the failover controller reacts:
    ///
    /// - [`FailureKind::Terminal`]: surface immediately, don't fail over
    /// - [`FailureKind::ProviderFault`]: record a health failure, try the
    ///   next provider
    /// - [`FailureKind::NotSupported`]: skip the provider, no penalty
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            // Unknown symbol - first confirmation wins, no failover
            Self::SymbolNotFound(_) => FailureKind::Terminal,

            // Provider faults - penalize health, try the next one
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Normalization { .. }
            | Self::SymbolTranslation { .. } => FailureKind::ProviderFault,

            // Capability miss - skip without penalty
            Self::StreamingNotSupported { .. } => FailureKind::NotSupported,

            // Exhausted all options - terminal
            Self::NoProvidersAvailable | Self::AllProvidersUnavailable { .. } => {
                FailureKind::Terminal
            }
        }
    }

    /// The provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Transport { provider, .. }
            | Self::Timeout { provider }
            | Self::RateLimited { provider }
            | Self::Normalization { provider, .. }
            | Self::SymbolTranslation { provider, .. }
            | Self::StreamingNotSupported { provider } => Some(provider),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_not_found_is_terminal() {
        let error = MarketDataError::SymbolNotFound("FAKEUSD".to_string());
        assert_eq!(error.failure_kind(), FailureKind::Terminal);
    }

    #[test]
    fn test_transport_is_provider_fault() {
        let error = MarketDataError::Transport {
            provider: "BINANCE".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(error.failure_kind(), FailureKind::ProviderFault);
    }

    #[test]
    fn test_timeout_is_provider_fault() {
        let error = MarketDataError::Timeout {
            provider: "COINGECKO".to_string(),
        };
        assert_eq!(error.failure_kind(), FailureKind::ProviderFault);
    }

    #[test]
    fn test_rate_limited_is_provider_fault() {
        let error = MarketDataError::RateLimited {
            provider: "CRYPTOCOMPARE".to_string(),
        };
        assert_eq!(error.failure_kind(), FailureKind::ProviderFault);
    }

    #[test]
    fn test_normalization_is_provider_fault() {
        let error = MarketDataError::Normalization {
            provider: "COINBASE".to_string(),
            message: "missing field `amount`".to_string(),
        };
        assert_eq!(error.failure_kind(), FailureKind::ProviderFault);
    }

    #[test]
    fn test_symbol_translation_is_provider_fault() {
        let error = MarketDataError::SymbolTranslation {
            provider: "COINGECKO".to_string(),
            symbol: "OBSCUREUSDT".to_string(),
        };
        assert_eq!(error.failure_kind(), FailureKind::ProviderFault);
    }

    #[test]
    fn test_streaming_not_supported_has_no_penalty() {
        let error = MarketDataError::StreamingNotSupported {
            provider: "COINGECKO".to_string(),
        };
        assert_eq!(error.failure_kind(), FailureKind::NotSupported);
    }

    #[test]
    fn test_exhaustion_errors_are_terminal() {
        assert_eq!(
            MarketDataError::NoProvidersAvailable.failure_kind(),
            FailureKind::Terminal
        );
        let error = MarketDataError::AllProvidersUnavailable {
            symbol: "BTCUSDT".to_string(),
            attempts: vec![],
        };
        assert_eq!(error.failure_kind(), FailureKind::Terminal);
    }

    #[test]
    fn test_provider_attribution() {
        let error = MarketDataError::Timeout {
            provider: "KRAKEN".to_string(),
        };
        assert_eq!(error.provider(), Some("KRAKEN"));
        assert_eq!(
            MarketDataError::SymbolNotFound("X".to_string()).provider(),
            None
        );
    }

    #[test]
    fn test_aggregated_error_display_names_every_attempt() {
        let error = MarketDataError::AllProvidersUnavailable {
            symbol: "BTCUSDT".to_string(),
            attempts: vec![
                ProviderAttempt {
                    provider: "BINANCE".to_string(),
                    error: "Timeout: BINANCE".to_string(),
                },
                ProviderAttempt {
                    provider: "COINGECKO".to_string(),
                    error: "Transport error: COINGECKO - 502".to_string(),
                },
            ],
        };
        let rendered = format!("{}", error);
        assert!(rendered.contains("BTCUSDT"));
        assert!(rendered.contains("BINANCE: Timeout"));
        assert!(rendered.contains("COINGECKO: Transport error"));
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::SymbolNotFound("FAKEUSD".to_string());
        assert_eq!(format!("{}", error), "Symbol not found: FAKEUSD");

        let error = MarketDataError::SymbolTranslation {
            provider: "COINGECKO".to_string(),
            symbol: "NEWCOINUSDT".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "No COINGECKO listing for symbol NEWCOINUSDT"
        );
    }
}
