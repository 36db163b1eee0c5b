//! Shared test utilities for integration tests

use tracing_subscriber::EnvFilter;

/// Initializes tracing for integration tests.
///
/// Safe to call from every test; only the first call installs the
/// subscriber.  Set `RUST_LOG=mcprobe=debug` to see flow step logging
/// while debugging a failing test.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
