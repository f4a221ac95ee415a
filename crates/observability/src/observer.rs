use std::error::Error;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use opentelemetry::trace::noop::NoopTracer;
use opentelemetry::trace::{Span, Status};
use opentelemetry_sdk::trace::SdkTracer;
use tracing::{debug, error, info, warn, Dispatch};
use tracing_subscriber::fmt::MakeWriter;

use crate::models::LogLevel;

/// A named tracer and logger pair handed to application code.
#[derive(Clone)]
pub struct Observer {
    name: String,
    tracer: SdkTracer,
    logger: Logger,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Observer {
    pub(crate) fn new(name: &str, tracer: SdkTracer, dispatch: Dispatch) -> Self {
        Self {
            name: name.to_string(),
            tracer,
            logger: Logger::new(name, dispatch),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracer(&self) -> &SdkTracer {
        &self.tracer
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

/// Emits records tagged with `logger = <name>` through the installed
/// subscriber, whether or not it is the process default.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    dispatch: Dispatch,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Logger {
    pub(crate) fn new(name: &str, dispatch: Dispatch) -> Self {
        Self {
            name: Arc::from(name),
            dispatch,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` with this logger's subscriber as the default, so plain
    /// `tracing` macros and spans inside it reach the same output.
    pub fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// `dpanic`, `panic` and `fatal` are emitted at `ERROR` with a
    /// `severity` field; none of them panic or exit.
    pub fn log(&self, level: LogLevel, message: impl fmt::Display) {
        let logger = &*self.name;
        self.in_scope(|| match level {
            LogLevel::Debug => debug!(logger, "{message}"),
            LogLevel::Info => info!(logger, "{message}"),
            LogLevel::Warn => warn!(logger, "{message}"),
            LogLevel::Error => error!(logger, "{message}"),
            severe => error!(logger, severity = severe.as_str(), "{message}"),
        })
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogLevel::Error, message)
    }
}

/// Marks `span` as failed and records `err` on it. Non-recording spans are
/// left alone.
pub fn record_error<S: Span>(span: &mut S, err: &dyn Error) {
    if !span.is_recording() {
        return;
    }
    span.record_error(err);
    span.set_status(Status::error(err.to_string()));
}

/// A tracer that records nothing, for code paths that run without telemetry.
pub fn noop_tracer() -> NoopTracer {
    NoopTracer::new()
}

/// In-memory sink for log records and console spans, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    /// Lines that parse as JSON objects.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter(serde_json::Value::is_object)
            .collect()
    }

    pub fn clear(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
