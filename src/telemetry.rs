//! Logging bootstrap, offered as a convenience, not invoked implicitly by
//! any engine code. Mirrors this crate's own former `main.rs`
//! initialization (`tracing_subscriber::registry()` + `EnvFilter` +
//! `fmt::layer()`), generalized to a reusable function for an embedder.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `tracing` subscriber reading `RUST_LOG`, defaulting to
/// `tunnelkit=info`. Safe to call at most once per process; a second call
/// is a no-op (the global default subscriber can only be set once).
pub fn init() {
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnelkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer());

    // Embedding applications (e.g. a test harness, or a CLI that already
    // installed its own subscriber) may call this more than once; ignore
    // the error rather than panicking.
    let _ = subscriber.try_init();
}
