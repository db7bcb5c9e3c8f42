//! Shared helpers for `localci` integration tests: pipeline builders, a
//! scripted executor, and tracing setup.

pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for any single async test body.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness capture.
///
/// Directives come from `LOCALCI_LOG` (same variable as the binary), so
/// `LOCALCI_LOG=localci::dag=trace cargo test -- --nocapture` shows
/// scheduler decisions.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = std::env::var("LOCALCI_LOG")
            .ok()
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking with the test's own label if it exceeds
/// [`TEST_TIMEOUT`]. A hung scheduler shows up here rather than as a stuck
/// test binary.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("pipeline did not finish within {TEST_TIMEOUT:?}"),
    }
}
