use std::fmt;
use std::str::FromStr;

use lookout_config::{ConfigError, ConfigResult, ResolvedConfig};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;

use crate::schema::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    DPanic,
    Panic,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::DPanic,
        LogLevel::Panic,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::DPanic => "dpanic",
            LogLevel::Panic => "panic",
            LogLevel::Fatal => "fatal",
        }
    }

    /// Severities above `error` have no `tracing` counterpart and filter as `ERROR`.
    pub fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::DPanic | LogLevel::Panic | LogLevel::Fatal => {
                LevelFilter::ERROR
            }
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        Self::ALL
            .get(usize::from(raw))
            .copied()
            .unwrap_or(LogLevel::Info)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                format!(
                    "Invalid log level: {s}. Valid levels: debug, info, warn, error, dpanic, panic, fatal"
                )
            })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects how much detail each log record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Production,
    /// Adds source file, line and thread names.
    Development,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Profile::Production),
            "development" => Ok(Profile::Development),
            _ => Err(format!(
                "Invalid log config: {s}. Valid configs: production, development"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {s}. Valid formats: console, json")),
        }
    }
}

/// Output style of the console span exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    /// One JSON object per line.
    Production,
    /// Indented JSON.
    Pretty,
}

impl FromStr for ConsoleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(ConsoleFormat::Production),
            "pretty" => Ok(ConsoleFormat::Pretty),
            _ => Err(format!(
                "Invalid console format: {s}. Valid formats: production, pretty"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Agent,
    Collector,
}

impl FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" => Ok(EndpointKind::Agent),
            "collector" => Ok(EndpointKind::Collector),
            _ => Err(format!(
                "Invalid endpoint kind: {s}. Valid kinds: agent, collector"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Grpc,
    Http,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grpc" => Ok(Transport::Grpc),
            "http" => Ok(Transport::Http),
            _ => Err(format!("Invalid transport: {s}. Valid transports: grpc, http")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    Console,
    Otlp,
}

impl FromStr for ExporterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(ExporterKind::Console),
            "otlp" => Ok(ExporterKind::Otlp),
            _ => Err(format!("Unsupported exporter: {s}")),
        }
    }
}

impl fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExporterKind::Console => write!(f, "console"),
            ExporterKind::Otlp => write!(f, "otlp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Attached as `id` to every record.
    pub app_id: String,
    pub color: bool,
    pub profile: Profile,
    pub format: LogFormat,
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtlpConfig {
    pub endpoint_kind: EndpointKind,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl OtlpConfig {
    pub const AGENT_PORT: u16 = 6831;
    pub const GRPC_PORT: u16 = 4317;
    pub const HTTP_PORT: u16 = 4318;

    pub fn default_port(endpoint_kind: EndpointKind, transport: Transport) -> u16 {
        match (endpoint_kind, transport) {
            (EndpointKind::Agent, _) => Self::AGENT_PORT,
            (EndpointKind::Collector, Transport::Grpc) => Self::GRPC_PORT,
            (EndpointKind::Collector, Transport::Http) => Self::HTTP_PORT,
        }
    }

    /// `scheme://host:port`; plain hosts get `http://`.
    pub fn endpoint(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracerConfig {
    pub app_id: String,
    pub app_name: String,
    /// Exporter names in construction order.
    pub exporters: Vec<String>,
    pub console_format: ConsoleFormat,
    /// Present when `otlp.host` resolved.
    pub otlp: Option<OtlpConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub logger: LoggerConfig,
    pub tracer: TracerConfig,
}

fn choice<T>(config: &ResolvedConfig, set: &str, field: &str) -> ConfigResult<T>
where
    T: FromStr<Err = String>,
{
    config
        .require_string(set, field)?
        .parse()
        .map_err(|reason| ConfigError::Projection {
            set: set.to_string(),
            field: field.to_string(),
            reason,
        })
}

impl LoggerConfig {
    pub fn from_resolved(config: &ResolvedConfig) -> ConfigResult<Self> {
        Ok(Self {
            app_id: config.require_string(APP, APP_ID)?.to_string(),
            color: config.require_bool(LOG, LOG_COLOR)?,
            profile: choice(config, LOG, LOG_CONFIG)?,
            format: choice(config, LOG, LOG_FORMAT)?,
            level: choice(config, LOG, LOG_LEVEL)?,
        })
    }
}

impl OtlpConfig {
    /// `None` when no host resolved, i.e. the OTLP exporter was not requested.
    pub fn from_resolved(config: &ResolvedConfig) -> ConfigResult<Option<Self>> {
        let Some(host) = config.get_string(OTLP, OTLP_HOST)? else {
            return Ok(None);
        };

        let endpoint_kind = choice(config, OTLP, OTLP_ENDPOINT_KIND)?;
        let transport = choice(config, OTLP, OTLP_TRANSPORT)?;
        let port = match config.get_int(OTLP, OTLP_PORT)? {
            Some(port) => u16::try_from(port).map_err(|_| ConfigError::Projection {
                set: OTLP.to_string(),
                field: OTLP_PORT.to_string(),
                reason: format!("{port} is not a valid port"),
            })?,
            None => Self::default_port(endpoint_kind, transport),
        };

        Ok(Some(Self {
            endpoint_kind,
            transport,
            host: host.to_string(),
            port,
        }))
    }
}

impl TracerConfig {
    pub fn from_resolved(config: &ResolvedConfig) -> ConfigResult<Self> {
        Ok(Self {
            app_id: config.require_string(APP, APP_ID)?.to_string(),
            app_name: config.require_string(APP, APP_NAME)?.to_string(),
            exporters: config.require_strings(OTEL, OTEL_EXPORTERS)?.to_vec(),
            console_format: choice(config, OTEL, OTEL_CONSOLE_FORMAT)?,
            otlp: OtlpConfig::from_resolved(config)?,
        })
    }
}

impl ObservabilityConfig {
    pub fn from_resolved(config: &ResolvedConfig) -> ConfigResult<Self> {
        Ok(Self {
            logger: LoggerConfig::from_resolved(config)?,
            tracer: TracerConfig::from_resolved(config)?,
        })
    }
}
