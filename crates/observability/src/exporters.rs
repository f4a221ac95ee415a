//! Span exporters and trace provider assembly.

use std::fmt;
use std::future::Future;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::{SpanId, Status};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{HOST_NAME, SERVICE_INSTANCE_ID};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use serde_json::{json, Map};
use tracing::debug;

use crate::errors::{TelemetryError, TelemetryResult};
use crate::models::{ConsoleFormat, ExporterKind, OtlpConfig, TracerConfig, Transport};

/// Destination shared between the console exporter and whoever created it.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn shared_writer<W: Write + Send + 'static>(writer: W) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Writes each finished span as JSON.
pub struct ConsoleSpanExporter {
    writer: SharedWriter,
    format: ConsoleFormat,
    resource: Map<String, serde_json::Value>,
}

impl fmt::Debug for ConsoleSpanExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleSpanExporter")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl ConsoleSpanExporter {
    pub fn stdout(format: ConsoleFormat) -> Self {
        Self::with_writer(shared_writer(io::stdout()), format)
    }

    pub fn with_writer(writer: SharedWriter, format: ConsoleFormat) -> Self {
        Self {
            writer,
            format,
            resource: Map::new(),
        }
    }

    fn render(&self, span: &SpanData) -> serde_json::Value {
        let parent = (span.parent_span_id != SpanId::INVALID)
            .then(|| span.parent_span_id.to_string());
        let status = match &span.status {
            Status::Unset => json!({ "code": "unset" }),
            Status::Ok => json!({ "code": "ok" }),
            Status::Error { description } => {
                json!({ "code": "error", "description": description.to_string() })
            }
        };
        let events: Vec<serde_json::Value> = span
            .events
            .iter()
            .map(|event| {
                json!({
                    "name": event.name.to_string(),
                    "timestamp": timestamp(event.timestamp),
                    "attributes": attributes(&event.attributes),
                })
            })
            .collect();

        json!({
            "name": span.name.to_string(),
            "trace_id": span.span_context.trace_id().to_string(),
            "span_id": span.span_context.span_id().to_string(),
            "parent_span_id": parent,
            "kind": format!("{:?}", span.span_kind),
            "start_time": timestamp(span.start_time),
            "end_time": timestamp(span.end_time),
            "attributes": attributes(&span.attributes),
            "events": events,
            "status": status,
            "scope": span.instrumentation_scope.name(),
            "resource": self.resource,
        })
    }

    fn write_batch(&self, batch: &[SpanData]) -> OTelSdkResult {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        for span in batch {
            let record = self.render(span);
            let written = match self.format {
                ConsoleFormat::Production => serde_json::to_writer(&mut *writer, &record),
                ConsoleFormat::Pretty => serde_json::to_writer_pretty(&mut *writer, &record),
            };
            written.map_err(|e| OTelSdkError::InternalFailure(e.to_string()))?;
            writer
                .write_all(b"\n")
                .map_err(|e| OTelSdkError::InternalFailure(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| OTelSdkError::InternalFailure(e.to_string()))
    }
}

impl SpanExporter for ConsoleSpanExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        std::future::ready(self.write_batch(&batch))
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .map_err(|e| OTelSdkError::InternalFailure(e.to_string()))
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value.as_str())))
            .collect();
    }
}

fn timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn attributes(attributes: &[KeyValue]) -> Map<String, serde_json::Value> {
    attributes
        .iter()
        .map(|kv| (kv.key.to_string(), json!(kv.value.as_str())))
        .collect()
}

/// Builds the OTLP exporter for the configured transport.
///
/// The gRPC transport needs a running tokio runtime.
pub fn otlp_exporter(config: &OtlpConfig) -> TelemetryResult<opentelemetry_otlp::SpanExporter> {
    let build_error = |reason: String| TelemetryError::ExporterBuild {
        exporter: ExporterKind::Otlp.to_string(),
        reason,
    };

    let built = match config.transport {
        Transport::Grpc => {
            tokio::runtime::Handle::try_current()
                .map_err(|_| build_error("grpc transport requires a tokio runtime".to_string()))?;
            opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(config.endpoint())
                .build()
        }
        Transport::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(format!("{}/v1/traces", config.endpoint()))
            .build(),
    };
    built.map_err(|e| build_error(e.to_string()))
}

/// Service name, instance id and host name, merged over the SDK defaults.
pub fn resource(config: &TracerConfig) -> Resource {
    let mut attributes = vec![KeyValue::new(SERVICE_INSTANCE_ID, config.app_id.clone())];
    if let Ok(host) = hostname::get() {
        attributes.push(KeyValue::new(HOST_NAME, host.to_string_lossy().into_owned()));
    }

    Resource::builder()
        .with_service_name(config.app_name.clone())
        .with_schema_url(attributes, SCHEMA_URL)
        .build()
}

/// Assembles the trace provider, one batch processor per exporter in list
/// order. Any failure aborts before a provider exists.
///
/// An empty exporter list yields a provider that samples nothing.
pub fn build_provider(
    config: &TracerConfig,
    console_writer: Option<SharedWriter>,
) -> TelemetryResult<SdkTracerProvider> {
    let mut builder = SdkTracerProvider::builder().with_resource(resource(config));

    if config.exporters.is_empty() {
        debug!("no span exporters configured, tracing is disabled");
        return Ok(builder.with_sampler(Sampler::AlwaysOff).build());
    }

    for name in &config.exporters {
        let kind: ExporterKind = name
            .parse()
            .map_err(|_| TelemetryError::UnsupportedExporter(name.clone()))?;

        builder = match kind {
            ExporterKind::Console => {
                let exporter = match &console_writer {
                    Some(writer) => {
                        ConsoleSpanExporter::with_writer(Arc::clone(writer), config.console_format)
                    }
                    None => ConsoleSpanExporter::stdout(config.console_format),
                };
                builder.with_batch_exporter(exporter)
            }
            ExporterKind::Otlp => {
                let otlp = config.otlp.as_ref().ok_or_else(|| TelemetryError::ExporterBuild {
                    exporter: kind.to_string(),
                    reason: "otlp endpoint is not configured".to_string(),
                })?;
                builder.with_batch_exporter(otlp_exporter(otlp)?)
            }
        };
        debug!(exporter = %kind, "span exporter configured");
    }

    Ok(builder.build())
}
