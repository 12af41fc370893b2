use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing with an `EnvFilter`. `RUST_LOG` wins over
/// `default_filter` when set.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    tracing::debug!(filter = %default_filter, "Tracing initialized");
    Ok(())
}
