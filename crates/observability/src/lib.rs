//! Logger and trace provider bootstrap driven by a declarative field registry.

pub mod errors;
pub mod exporters;
mod logger;
pub mod models;
pub mod observer;
pub mod schema;
pub mod telemetry;

pub use errors::{TelemetryError, TelemetryResult};
pub use exporters::{build_provider, ConsoleSpanExporter, SharedWriter};
pub use models::{
    ConsoleFormat, EndpointKind, ExporterKind, LogFormat, LogLevel, LoggerConfig,
    ObservabilityConfig, OtlpConfig, Profile, TracerConfig, Transport,
};
pub use observer::{noop_tracer, record_error, LogCapture, Logger, Observer};
pub use schema::{logger_registry, registry, tracer_registry};
pub use telemetry::{InstallScope, LifecycleState, Telemetry};
