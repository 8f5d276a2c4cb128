//! Logging and optional OpenTelemetry export.
//!
//! Without an OTLP endpoint the process logs to stdout only. With one, traces,
//! logs and metrics are exported over gRPC as well.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use opentelemetry::metrics::Counter;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "uniqstore";

/// Bounds how long an unreachable collector can stall export or shutdown.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps exporters alive. Call [`TelemetryGuard::shutdown`] before exit to flush.
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryGuard {
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }

    pub fn shutdown(self) {
        if !self.is_exporting() {
            return;
        }
        tracing::info!("flushing telemetry");
        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("tracer provider shutdown failed: {e}");
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("meter provider shutdown failed: {e}");
            }
        }
        if let Some(provider) = self.logger_provider {
            if let Err(e) = provider.shutdown() {
                eprintln!("logger provider shutdown failed: {e}");
            }
        }
    }
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|e| {
        eprintln!("invalid log filter {log_level:?} ({e}), using info");
        EnvFilter::new("info")
    })
}

/// Install the global subscriber.
///
/// `log_level` is an `EnvFilter` directive string and already reflects
/// `RUST_LOG` when set.
pub fn init(log_level: &str, otlp_endpoint: Option<&str>) -> Result<TelemetryGuard> {
    let Some(otlp_endpoint) = otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter(log_level))
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("failed to install tracing subscriber")?;
        return Ok(TelemetryGuard::default());
    };

    let resource = Resource::builder_empty()
        .with_service_name(SERVICE_NAME)
        .with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();

    let endpoint = if otlp_endpoint.starts_with("http://") || otlp_endpoint.starts_with("https://") {
        otlp_endpoint.to_string()
    } else {
        format!("http://{}", otlp_endpoint)
    };

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("failed to create OTLP span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_span_processor(
            opentelemetry_sdk::trace::BatchSpanProcessor::builder(span_exporter).build(),
        )
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource.clone())
        .build();
    let tracer = tracer_provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(tracer_provider.clone());

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("failed to create OTLP log exporter")?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_log_processor(opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build())
        .with_resource(resource.clone())
        .build();

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .context("failed to create OTLP metric exporter")?;

    let meter_provider = SdkMeterProvider::builder()
        .with_reader(opentelemetry_sdk::metrics::PeriodicReader::builder(metric_exporter).build())
        .with_resource(resource)
        .build();
    global::set_meter_provider(meter_provider.clone());

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
            &logger_provider,
        ))
        .try_init()
        .context("failed to install tracing subscriber")?;

    tracing::info!(endpoint = %otlp_endpoint, "exporting traces, logs and metrics over OTLP");

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
        logger_provider: Some(logger_provider),
        meter_provider: Some(meter_provider),
    })
}

/// Count an upload. `deduplicated` is true when no bytes were written.
///
/// The counter is built on first use, so `init` must run before the first
/// upload for it to be exported.
pub fn record_upload(deduplicated: bool) {
    static UPLOADS: OnceLock<Counter<u64>> = OnceLock::new();
    let counter = UPLOADS.get_or_init(|| {
        global::meter(SERVICE_NAME)
            .u64_counter("uniqstore.uploads")
            .with_description("Content uploads, by whether the write was deduplicated")
            .build()
    });
    counter.add(1, &[KeyValue::new("dedup", deduplicated)]);
}

/// Parent context from a request's `traceparent` header, if it carries a valid one.
pub fn extract_traceparent(headers: &HeaderMap) -> Option<opentelemetry::Context> {
    let value = headers.get("traceparent")?.to_str().ok();
    parse_traceparent(value)
}

/// Parse a W3C traceparent header into a remote parent context.
///
/// Format: `{version}-{trace_id}-{span_id}-{trace_flags}`, e.g.
/// `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`.
pub fn parse_traceparent(traceparent: Option<&str>) -> Option<opentelemetry::Context> {
    use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};

    let tp = traceparent?;
    let parts: Vec<&str> = tp.split('-').collect();
    let [version, trace_id, span_id, flags] = parts.as_slice() else {
        tracing::debug!(traceparent = %tp, "malformed traceparent");
        return None;
    };

    if *version != "00" {
        tracing::debug!(version = %version, "unsupported traceparent version");
        return None;
    }

    let trace_id = TraceId::from_bytes(hex_to_bytes::<16>(trace_id)?);
    let span_id = SpanId::from_bytes(hex_to_bytes::<8>(span_id)?);
    let flags = TraceFlags::new(u8::from_str_radix(flags, 16).unwrap_or(0));

    let span_context = SpanContext::new(trace_id, span_id, flags, true, TraceState::default());
    if !span_context.is_valid() {
        return None;
    }
    Some(opentelemetry::Context::current().with_remote_span_context(span_context))
}

fn hex_to_bytes<const N: usize>(hex: &str) -> Option<[u8; N]> {
    if hex.len() != N * 2 {
        return None;
    }

    let mut bytes = [0u8; N];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(bytes)
}
