use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the JSON stdout subscriber, filtered by `RUST_LOG`.
///
/// Later calls are no-ops, so tests and binaries can both call it.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().json().with_current_span(false))
        .try_init();
}
