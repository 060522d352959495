//! APM span export over OTLP, aimed at New Relic's OTLP ingest.
//!
//! Env JSON value:
//! `cfboot_apm={"enable": true, "name": "my-app", "license": "...", "endpoint": "https://otlp.nr-data.net:4317"}`
//!
//! The license key travels as the `api-key` gRPC metadata header, which is
//! how New Relic authenticates OTLP traffic. Any other OTLP-speaking
//! backend works by pointing `endpoint` at it and leaving `license` empty.

use crate::config::app_settings;
use anyhow::Context;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use serde::Deserialize;
use tonic::metadata::MetadataMap;
use tracing::{Instrument, Subscriber};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_ENDPOINT: &str = "https://otlp.nr-data.net:4317";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApmSettings {
    pub enable: bool,
    pub name: String,
    pub license: String,
    pub endpoint: String,
}

impl ApmSettings {
    pub fn from_settings() -> anyhow::Result<Self> {
        app_settings().parse("cfboot_apm")
    }

    /// The reported service name: explicit setting first, then the Cloud
    /// Foundry application name.
    fn service_name(&self) -> String {
        if self.name.is_empty() {
            crate::APP_NAME.clone()
        } else {
            self.name.clone()
        }
    }

    fn endpoint(&self) -> &str {
        if self.endpoint.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            &self.endpoint
        }
    }
}

pub fn setup_apm_layer<S>() -> anyhow::Result<impl Layer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let settings = ApmSettings::from_settings()?;
    if !settings.enable {
        anyhow::bail!("APM export is disabled (cfboot_apm.enable)");
    }

    let provider = setup_tracer_provider(&settings)?;
    let tracer = provider.tracer(settings.service_name());
    let filter = EnvFilter::try_from_env("RUST_TRACE").unwrap_or_else(|_| EnvFilter::new("debug"));
    let layer = OpenTelemetryLayer::new(tracer).with_filter(filter);

    Ok(layer)
}

fn setup_tracer_provider(settings: &ApmSettings) -> anyhow::Result<SdkTracerProvider> {
    let endpoint = settings.endpoint();

    let mut metadata = MetadataMap::new();
    if !settings.license.is_empty() {
        metadata.insert(
            "api-key",
            settings
                .license
                .parse()
                .context("The APM license key is not a valid header value")?,
        );
    }

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_metadata(metadata)
        .build()
        .context(format!("Failed to build OTLP exporter for: {}", endpoint))?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_max_events_per_span(64)
        .with_max_attributes_per_span(16)
        .with_resource(
            Resource::builder_empty()
                .with_attributes([KeyValue::new("service.name", settings.service_name())])
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(tracer_provider.clone());

    Ok(tracer_provider)
}

/// Runs a future inside a named span so its work shows up as a transaction.
pub async fn traced<F: Future>(name: &'static str, fut: F) -> F::Output {
    fut.instrument(tracing::info_span!("transaction", otel.name = name))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_prefers_explicit_setting() {
        let settings = ApmSettings {
            name: "billing".to_owned(),
            ..ApmSettings::default()
        };
        assert_eq!(settings.service_name(), "billing");
    }

    #[test]
    fn endpoint_defaults_to_new_relic_ingest() {
        let settings = ApmSettings::default();
        assert_eq!(settings.endpoint(), DEFAULT_ENDPOINT);

        let settings = ApmSettings {
            endpoint: "http://collector:4317".to_owned(),
            ..ApmSettings::default()
        };
        assert_eq!(settings.endpoint(), "http://collector:4317");
    }

    #[test]
    fn apm_export_is_disabled_by_default() {
        let settings = ApmSettings::default();
        assert!(!settings.enable);
    }

    #[tokio::test]
    async fn traced_returns_the_future_output() {
        let result = traced("test", async { 21 * 2 }).await;
        assert_eq!(result, 42);
    }
}
