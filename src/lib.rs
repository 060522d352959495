use std::sync::LazyLock;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{SignalKind, signal};

pub mod config;
pub mod logging;
pub mod tools;
pub mod web;

#[cfg(feature = "blobstore")]
pub mod blobstore;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "elastic")]
pub mod elastic;

#[cfg(feature = "open_telemetry")]
pub mod apm;

/// Name of the running application as reported by Cloud Foundry, falling back
/// to the `APP_NAME` environment variable for local runs.
pub static APP_NAME: LazyLock<String> = LazyLock::new(|| {
    let name = config::app_settings().get_string_env("VCAP_APPLICATION", &["application_name"]);
    if name.is_empty() {
        std::env::var("APP_NAME").unwrap_or("cfboot-app".to_string())
    } else {
        name
    }
});

/// Version of the running application as reported by Cloud Foundry.
pub static APP_VERSION: LazyLock<String> = LazyLock::new(|| {
    let version =
        config::app_settings().get_string_env("VCAP_APPLICATION", &["application_version"]);
    if version.is_empty() {
        std::env::var("APP_VERSION").unwrap_or("DEVELOPMENT-SNAPSHOT-VERSION".to_string())
    } else {
        version
    }
});

/// Index of this application instance within its Cloud Foundry deployment.
pub static INSTANCE_INDEX: LazyLock<String> =
    LazyLock::new(|| std::env::var("CF_INSTANCE_INDEX").unwrap_or("0".to_string()));

pub async fn await_termination(purpose: &str) {
    let ctrl_c = ctrl_c();
    if let Ok(mut sig_hup) = signal(SignalKind::hangup()) {
        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received CTRL-C. Shutting down: '{}'...", purpose);
            },
            _ = sig_hup.recv() => {
                tracing::info!("Received SIGHUP. Shutting down: '{}'...", purpose);
            }
        }
    } else {
        let _ = ctrl_c.await;
        tracing::info!("Received CTRL-C. Shutting down: '{}'...", purpose);
    }
}
