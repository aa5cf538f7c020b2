//! OpenTelemetry tracing bootstrap, extracted from the entry point so
//! `main.rs` stays a thin assembly script. Gated on
//! `OTEL_EXPORTER_OTLP_ENDPOINT` per spec.md §6's observability-emission
//! contract (the exporter backend itself is out of scope).

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{registry::LookupSpan, Layer};

/// Build the OpenTelemetry tracing layer, exporting via OTLP to the
/// endpoint named by `OTEL_EXPORTER_OTLP_ENDPOINT`. Call only when that
/// variable is set.
pub fn init_telemetry<S>() -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let exporter = opentelemetry_otlp::new_exporter().tonic();

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            "graphdb-operator",
        )])))
        .install_batch(runtime::Tokio)
        .expect("failed to install OTLP tracer pipeline");

    let tracer = provider.tracer("graphdb-operator");
    tracing_opentelemetry::layer().with_tracer(tracer)
}

/// Flush any buffered spans before process exit.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
