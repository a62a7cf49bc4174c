// Tracing setup for binaries and tests embedding context propagation

use std::sync::Once;

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

static TEST_INIT: Once = Once::new();

//-----------------------------------------------------------------------------
// Tracing Initialization
//-----------------------------------------------------------------------------

/// Initializes the global tracing subscriber.
///
/// # Arguments
///
/// * `log_level`: Filter used when `RUST_LOG` is unset. Defaults to "info".
///                Accepts directives such as "ambit_context=debug,info".
/// * `json_output`: Emit JSON lines instead of the human-readable format.
///                  Defaults to `false`.
pub fn init_tracing(log_level: Option<&str>, json_output: Option<bool>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.unwrap_or("info")))?;

    let subscriber = Registry::default().with(env_filter);

    if json_output.unwrap_or(false) {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true);
        tracing::subscriber::set_global_default(subscriber.with(json_layer))?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_level(true);
        tracing::subscriber::set_global_default(subscriber.with(fmt_layer))?;
    }

    Ok(())
}

/// Initialize debug-level logging routed through the test writer
/// (called once per test binary)
pub fn init_test_logging() {
    TEST_INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ambit_context=debug"));
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_test_writer();
        let subscriber = Registry::default().with(env_filter).with(fmt_layer);

        // Another subscriber may already be installed by the embedding binary
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

//-----------------------------------------------------------------------------
// Tests
//-----------------------------------------------------------------------------
