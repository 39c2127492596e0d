//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
///
/// Kernel events are emitted under the `engine_kernel` target, so
/// `RUST_LOG=engine_kernel=debug` shows slot transitions and gate traffic.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
