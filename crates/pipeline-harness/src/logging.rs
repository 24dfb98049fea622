//! Tracing setup for test binaries.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "warn";

static INIT: Once = Once::new();

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Output goes through the test writer so it is captured per test. Safe to
/// call from every test; only the first call has an effect, and an already
/// installed global subscriber is left in place.
pub fn init() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(false)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
        tracing::debug!("logging initialized twice without panicking");
    }
}
