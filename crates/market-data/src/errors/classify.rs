/// Classification for failover policy.
///
/// Used to determine how the failover controller should respond to errors
/// from providers.
///
/// # Behavior Summary
///
/// | Kind | Try Next Provider? | Record Health Failure? |
/// |------|--------------------|------------------------|
/// | `Terminal` | No | No |
/// | `ProviderFault` | Yes | Yes (affects future requests) |
/// | `NotSupported` | Yes (skip this one) | No |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// The request itself is unanswerable - unknown symbol, or every
    /// option already exhausted. Surfaced to the caller as-is; trying
    /// another provider won't help.
    Terminal,

    /// This provider failed (transport, timeout, rate limit, malformed
    /// payload, or a doomed symbol translation). The failure is recorded
    /// against the provider's health, which may mark it `failing` and
    /// exclude it from future attempts, while the next provider in
    /// priority order is tried.
    ProviderFault,

    /// The provider cannot perform this operation at all (e.g. no
    /// streaming endpoint). Skipped without penalty - a capability miss
    /// says nothing about the provider's health.
    NotSupported,
}
