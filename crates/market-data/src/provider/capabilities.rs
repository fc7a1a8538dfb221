//! Provider capability flags.

/// Describes what a market data provider can do.
///
/// Every provider serves REST quote lookups; only some expose a real-time
/// streaming endpoint. The multiplexer consults this when picking a
/// provider for an upstream connection.
#[derive(Clone, Copy, Debug)]
pub struct ProviderCapabilities {
    /// Whether the provider exposes a real-time streaming endpoint.
    pub supports_streaming: bool,
}

impl ProviderCapabilities {
    /// REST quote lookups only.
    pub const fn rest_only() -> Self {
        Self {
            supports_streaming: false,
        }
    }

    /// REST quote lookups plus a real-time tick stream.
    pub const fn with_streaming() -> Self {
        Self {
            supports_streaming: true,
        }
    }
}
