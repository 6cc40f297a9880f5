//! Process-wide log subscriber.
//!
//! Library crates log through the `log` facade; the subscriber installed here
//! picks those records up through the `tracing-log` bridge.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter variable checked first, before `RUST_LOG`.
pub const LOG_ENV: &str = "ADP_LOG";

/// The filter directives in effect: `ADP_LOG`, else `RUST_LOG`, else `level`.
pub fn filter_directives(level: &str) -> String {
    [LOG_ENV, "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| level.to_string())
}

/// Install the subscriber. Returns `false` when one was already installed,
/// which is not an error: hosts may configure the provider more than once.
pub fn init(level: &str) -> bool {
    let directives = filter_directives(level);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "logs-json")]
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .try_init()
        .is_ok();

    #[cfg(not(feature = "logs-json"))]
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialised with filter '{}'", directives);
    }
    installed
}
