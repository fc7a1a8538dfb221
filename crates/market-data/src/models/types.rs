use std::borrow::Cow;
use std::sync::Arc;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Downstream client identifier, assigned by the gateway and shared
/// across subscription entries and event payloads without copying
pub type ClientId = Arc<str>;
