//! Field-sets describing the logger and tracer configuration.

use lookout_config::{
    ConfigResult, Field, FieldSet, FieldType, LoadCondition, Registry, SchemaError, Value,
};

pub const APP: &str = "app";
pub const LOG: &str = "log";
pub const OTEL: &str = "otel";
pub const OTLP: &str = "otlp";

pub const APP_ID: &str = "id";
pub const APP_NAME: &str = "name";

pub const LOG_COLOR: &str = "color";
pub const LOG_CONFIG: &str = "config";
pub const LOG_FORMAT: &str = "format";
pub const LOG_LEVEL: &str = "level";

pub const OTEL_EXPORTERS: &str = "exporters";
pub const OTEL_CONSOLE_FORMAT: &str = "console_format";

pub const OTLP_ENDPOINT_KIND: &str = "endpoint_kind";
pub const OTLP_TRANSPORT: &str = "transport";
pub const OTLP_HOST: &str = "host";
pub const OTLP_PORT: &str = "port";

pub const DEFAULT_APP_NAME: &str = "unknown_service";

pub fn app_field_set() -> Result<FieldSet, SchemaError> {
    FieldSet::builder(APP)
        .field(
            Field::new(APP_ID, FieldType::String)
                .default_generator(|| Value::String(uuid::Uuid::new_v4().to_string())),
        )
        .field(Field::new(APP_NAME, FieldType::String).default_value(DEFAULT_APP_NAME))
        .build()
}

pub fn log_field_set() -> Result<FieldSet, SchemaError> {
    FieldSet::builder(LOG)
        .field(Field::new(LOG_COLOR, FieldType::Bool).default_value(true))
        .field(
            Field::new(LOG_CONFIG, FieldType::String)
                .default_value("production")
                .enumeration(["production", "development"]),
        )
        .field(
            Field::new(LOG_FORMAT, FieldType::String)
                .default_value("json")
                .enumeration(["console", "json"]),
        )
        .field(
            Field::new(LOG_LEVEL, FieldType::String)
                .default_value("info")
                .enumeration(["debug", "info", "warn", "error", "dpanic", "panic", "fatal"]),
        )
        .build()
}

pub fn otel_field_set() -> Result<FieldSet, SchemaError> {
    FieldSet::builder(OTEL)
        .field(
            Field::new(OTEL_EXPORTERS, FieldType::StringList)
                .default_value(["console"])
                .enumeration(["console", "otlp"]),
        )
        .field(
            Field::new(OTEL_CONSOLE_FORMAT, FieldType::String)
                .default_value("production")
                .enumeration(["production", "pretty"]),
        )
        .build()
}

/// OTLP endpoint settings, required only when `otel.exporters` lists `otlp`.
pub fn otlp_field_set() -> Result<FieldSet, SchemaError> {
    FieldSet::builder(OTLP)
        .field(
            Field::new(OTLP_ENDPOINT_KIND, FieldType::String)
                .default_value("agent")
                .enumeration(["agent", "collector"]),
        )
        .field(
            Field::new(OTLP_TRANSPORT, FieldType::String)
                .default_value("grpc")
                .enumeration(["grpc", "http"]),
        )
        .field(Field::new(OTLP_HOST, FieldType::String).required())
        // no static default: it depends on endpoint kind and transport
        .field(
            Field::new(OTLP_PORT, FieldType::Int).validator("port_range", |value| {
                match value.as_int() {
                    Some(port) if (1..=65535).contains(&port) => Ok(()),
                    _ => Err("port must be between 1 and 65535".to_string()),
                }
            }),
        )
        .load_condition(
            LoadCondition::new(|lookup| {
                let exporters = lookup.get_strings(OTEL, OTEL_EXPORTERS)?.unwrap_or_default();
                Ok(exporters.iter().any(|exporter| exporter == "otlp"))
            })
            .depends_on(OTEL, OTEL_EXPORTERS),
        )
        .build()
}

/// Logger and tracer field-sets together.
pub fn registry() -> ConfigResult<Registry> {
    Ok(Registry::new([
        app_field_set()?,
        log_field_set()?,
        otel_field_set()?,
        otlp_field_set()?,
    ])?)
}

/// Field-sets needed to configure only the logger.
pub fn logger_registry() -> ConfigResult<Registry> {
    Ok(Registry::new([app_field_set()?, log_field_set()?])?)
}

/// Field-sets needed to configure only the tracer.
pub fn tracer_registry() -> ConfigResult<Registry> {
    Ok(Registry::new([
        app_field_set()?,
        otel_field_set()?,
        otlp_field_set()?,
    ])?)
}
