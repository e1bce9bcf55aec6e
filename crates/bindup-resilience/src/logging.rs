//! tracing-subscriber setup for suites built on the engine.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "bindup_resilience=info";

/// Install a human-readable subscriber honoring `RUST_LOG`
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with(DEFAULT_DIRECTIVE, false)
}

/// Install a subscriber with an explicit default directive, optionally as JSON
pub fn init_logging_with(default_directive: &str, json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        let _ = init_logging_with("bindup_resilience=debug", false);
        assert!(!init_logging());
    }
}
