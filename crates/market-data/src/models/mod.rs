//! Market data models
//!
//! This module contains the core data types for market data operations:
//! - `types` - Type aliases for common identifiers (ProviderId, ClientId)
//! - `quote` - The canonical normalized quote (Quote)
//! - `events` - Outward notification events (MarketEvent)

mod events;
mod quote;
mod types;

pub use events::MarketEvent;
pub use quote::Quote;
pub use types::{ClientId, ProviderId};
