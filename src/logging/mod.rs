//! Tracing setup for Cloud Foundry deployments.
//!
//! Console output goes to stdout as plain text, which is what the platform's
//! log drain expects. The default log level comes from the `cfboot_logging`
//! env JSON (`{"level": "DEBUG"}`); an explicit `RUST_LOG` always wins.

use crate::config::app_settings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const LOGGING_ENV: &str = "cfboot_logging";

#[cfg(feature = "open_telemetry")]
pub fn setup_tracing() {
    let console_layer = setup_console_layer();

    match crate::apm::setup_apm_layer() {
        Ok(otlp_layer) => {
            Registry::default()
                .with(console_layer)
                .with(otlp_layer)
                .init();

            tracing::info!(
                "Tracing initialized successfully [reporting to console as well as the APM endpoint]"
            );
        }
        Err(err) => {
            Registry::default().with(console_layer).init();
            tracing::info!("Tracing initialized successfully [reporting to console only]");
            tracing::info!("Skipping APM setup: {:#}", err);
        }
    }

    log_application_context();
}

#[cfg(not(feature = "open_telemetry"))]
pub fn setup_tracing() {
    let console_layer = setup_console_layer();
    Registry::default().with(console_layer).init();
    tracing::info!("Tracing initialized successfully [reporting to console only]");

    log_application_context();
}

fn log_application_context() {
    tracing::info!(
        "Running as '{}' ({}) instance {}",
        crate::APP_NAME.as_str(),
        crate::APP_VERSION.as_str(),
        crate::INSTANCE_INDEX.as_str()
    );
}

fn setup_console_layer() -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
    let format = tracing_subscriber::fmt::format()
        .with_ansi(false)
        .without_time();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level()));

    let layer = tracing_subscriber::fmt::layer()
        .event_format(format)
        .with_filter(filter);

    layer.boxed()
}

/// The default filter level from the `cfboot_logging` env blob. The original
/// platform images logged at DEBUG unless told otherwise.
fn default_level() -> String {
    normalize_level(&app_settings().get_string_env(LOGGING_ENV, &["level"]))
}

fn normalize_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        level @ ("trace" | "debug" | "info" | "warn" | "error") => level.to_owned(),
        // The original accepted PANIC and FATAL; map them to error.
        "panic" | "fatal" => "error".to_owned(),
        "warning" => "warn".to_owned(),
        _ => "debug".to_owned(),
    }
}
