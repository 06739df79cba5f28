//! Console logging shared by the binaries and tests of this workspace.
//! Filtering comes from `RUST_LOG`, output is either compact text or JSON lines.

use tracing::subscriber::{self, SetGlobalDefaultError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info";

fn env_filter_or_default() -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|e| {
        println!(
            "Missing or invalid RUST_LOG, defaulting to {DEFAULT_FILTER}. {:#?}",
            e
        );
        EnvFilter::builder()
            .parse(DEFAULT_FILTER)
            .unwrap_or_else(|_| panic!("{DEFAULT_FILTER} should work as filter"))
    })
}

/// Installs the global subscriber. Fails if one was already installed.
pub fn setup_console_logging(json: bool) -> Result<(), SetGlobalDefaultError> {
    let filter = env_filter_or_default();
    println!("Using env filter: {}", filter);
    let fmt = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .compact()
            .with_filter(filter)
            .boxed()
    };
    let subscriber = tracing_subscriber::Registry::default().with(fmt);
    subscriber::set_global_default(subscriber)
}

/// Safe to call from every test, only the first call installs anything
pub fn setup_tracing_console_logging_for_test() {
    static ONCE: std::sync::OnceLock<()> = std::sync::OnceLock::new();
    ONCE.get_or_init(|| {
        let fmt = tracing_subscriber::fmt::layer()
            // for tests ansi if nice
            .with_ansi(true)
            .compact()
            .with_test_writer()
            .with_filter(env_filter_or_default());
        let subscriber = tracing_subscriber::Registry::default().with(fmt);
        // another test harness may have set one already, that's fine
        let _ = subscriber::set_global_default(subscriber);
    });
}
