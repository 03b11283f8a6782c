/// Tracing subscriber setup for the binary.
///
/// The library only emits events; installing a subscriber is left to the
/// front-end so tests and embedders stay in control.
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install `fmt` output filtered by `RUST_LOG`, or a default level
pub fn init(verbose: bool) {
    let default = if verbose { "vidgrab=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
