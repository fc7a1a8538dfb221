//! Real-time price streaming.
//!
//! This module provides the live-tick half of the crate:
//! - A websocket connection wrapper that turns provider-specific frames
//!   into canonical quotes
//! - A subscription multiplexer that shares one upstream connection per
//!   symbol across every interested client

mod connection;
mod multiplexer;

pub use connection::{QuoteStream, TickParser, TickStream};
pub use multiplexer::{MultiplexerConfig, SubscriptionMultiplexer};
