//! Provider registry module.
//!
//! This module provides orchestration for market data providers, including:
//! - Provider registration and priority ordering
//! - Per-provider health tracking with a failure threshold
//! - Failover across providers with a preferred-provider signal

mod failover;
mod health;
mod registry;

pub use failover::FailoverController;
pub use health::{HealthConfig, HealthTracker, ProviderHealth, ProviderStatus};
pub use registry::ProviderRegistry;
