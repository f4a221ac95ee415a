use std::time::Duration;

use lookout_config::{ConfigError, ResolutionError, SchemaError};
use thiserror::Error;

/// Errors raised while bootstrapping or operating telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry is already initialized")]
    AlreadyInitialized,

    #[error("Telemetry has not been initialized")]
    NotInitialized,

    #[error("Telemetry has been shut down")]
    ShutDown,

    #[error("Unsupported exporter: {0}")]
    UnsupportedExporter(String),

    #[error("Failed to build {exporter} exporter: {reason}")]
    ExporterBuild { exporter: String, reason: String },

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("A global tracing subscriber is already installed: {0}")]
    SubscriberAlreadySet(String),

    #[error("{operation} did not finish within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Trace provider shutdown failed: {0}")]
    Shutdown(String),

    #[error("Trace provider flush failed: {0}")]
    Flush(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<SchemaError> for TelemetryError {
    fn from(err: SchemaError) -> Self {
        TelemetryError::Config(err.into())
    }
}

impl From<ResolutionError> for TelemetryError {
    fn from(err: ResolutionError) -> Self {
        TelemetryError::Config(err.into())
    }
}

impl TelemetryError {
    /// The resolution violations behind this error, if it came from resolving
    /// configuration.
    pub fn resolution(&self) -> Option<&ResolutionError> {
        match self {
            TelemetryError::Config(ConfigError::Resolution(err)) => Some(err),
            _ => None,
        }
    }
}

/// 统一的Result类型
pub type TelemetryResult<T> = Result<T, TelemetryError>;
