//! Subscriber setup for launchers and tests.

use crate::level::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "WEAKLAYER_LOG";
const DEFAULT_FILTER: &str = "warn";

/// Install a fmt subscriber filtered by `WEAKLAYER_LOG` (default `warn`).
/// Returns false if a global subscriber was already set.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Forward a message logged at one of the host's levels.
pub fn log_at(level: &Level, target: &str, message: &str) {
    let name = level.name();
    let t = level.as_tracing();
    if t == tracing::Level::ERROR {
        tracing::error!(source = target, host_level = name, "{message}");
    } else if t == tracing::Level::WARN {
        tracing::warn!(source = target, host_level = name, "{message}");
    } else if t == tracing::Level::INFO {
        tracing::info!(source = target, host_level = name, "{message}");
    } else if t == tracing::Level::DEBUG {
        tracing::debug!(source = target, host_level = name, "{message}");
    } else {
        tracing::trace!(source = target, host_level = name, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::{FINE, SEVERE};

    #[test]
    fn init_is_idempotent() {
        init();
        assert!(!init());
        log_at(&SEVERE, "test", "severe message");
        log_at(&FINE, "test", "fine message");
    }
}
