use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset or unparsable: the client's own
/// session, feed and request events at info, nothing from dependencies.
pub const DEFAULT_LOG_DIRECTIVES: &str = "kmchub_client=info";

/// Routes the client's `tracing` events to stderr. Hosts that install their
/// own subscriber first keep it; this call then does nothing.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_target(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES))
}
