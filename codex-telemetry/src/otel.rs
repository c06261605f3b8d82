//! Optional OpenTelemetry export path, gated behind the `otel` Cargo
//! feature so the default build carries no network-capable exporter.
//!
//! Follows the usual `tracing-opentelemetry` OTLP bridge pattern: build a
//! tracer provider from a resource and an OTLP span exporter, returning
//! `None` on anything that goes wrong rather than panicking, with a
//! warning logged for diagnosis.

use opentelemetry::KeyValue;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Build and install a batch OTLP tracer provider exporting over gRPC to
/// `endpoint`. Returns `None` (logging a warning) on any setup failure —
/// telemetry export is a nice-to-have, never a reason to fail startup.
pub fn init_tracer_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = match SpanExporter::builder().with_tonic().with_endpoint(endpoint).build() {
        Ok(exporter) => exporter,
        Err(err) => {
            tracing::warn!(error = %err, "OTel exporter init failed");
            return None;
        }
    };

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", service_name.to_string()))
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Some(provider)
}

/// A `tracing` layer that bridges span events onto the given provider's
/// tracer, for callers that want telemetry spans to also flow through
/// `tracing_subscriber`'s layer stack.
pub fn tracing_layer<S>(
    provider: &SdkTracerProvider,
    tracer_name: &'static str,
) -> tracing_opentelemetry::OpenTelemetryLayer<S, opentelemetry_sdk::trace::Tracer>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    tracing_opentelemetry::layer().with_tracer(provider.tracer(tracer_name))
}

/// Best-effort shutdown: flush and drop the provider, swallowing errors
/// since there is nothing more useful to do with them at process exit.
pub fn shutdown_tracer_provider(provider: SdkTracerProvider) {
    if let Err(err) = provider.shutdown() {
        tracing::warn!(error = %err, "OTel tracer provider shutdown failed");
    }
}
