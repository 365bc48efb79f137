//! Telemetry helpers for structured logging and tracing.
//!
//! Runtime components take a [`tracing::Span`] at construction and log inside
//! it. When none is supplied they create one under whatever dispatcher is
//! current, so installing a subscriber is the only global step.

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Install a test-friendly subscriber writing through the libtest capture.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
