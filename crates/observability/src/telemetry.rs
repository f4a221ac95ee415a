//! Lifecycle of the trace provider and logger.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use lookout_config::ResolvedConfig;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

use crate::errors::{TelemetryError, TelemetryResult};
use crate::exporters::{self, SharedWriter};
use crate::logger::{self, LoggerState};
use crate::models::{LogLevel, ObservabilityConfig};
use crate::observer::Observer;

const INSTRUMENTATION_NAME: &str = "lookout";

type LogWriterFactory = Arc<dyn Fn() -> BoxMakeWriter + Send + Sync>;

/// Where the logger and trace provider are published on initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallScope {
    /// Process-wide `tracing` default and OpenTelemetry global provider.
    Global,
    /// Kept on the [`Telemetry`] value; reachable only through its observers.
    Local,
}

/// Observable lifecycle of a [`Telemetry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    ShutDown,
}

struct Installed {
    provider: SdkTracerProvider,
    logger: LoggerState,
    config: ObservabilityConfig,
}

enum Lifecycle {
    Uninitialized,
    Ready(Installed),
    /// The trace provider is gone but the logger still runs.
    ShutDown(LoggerState),
}

/// Owns the trace provider and logger of a process.
///
/// Initialization happens at most once and is all-or-nothing. Share the value
/// by reference (or `Arc`) with whatever needs observers.
pub struct Telemetry {
    scope: InstallScope,
    state: RwLock<Lifecycle>,
    /// A provider shutdown that outlived its deadline and is still running.
    pending_shutdown: Mutex<Option<JoinHandle<OTelSdkResult>>>,
    log_writer: Option<LogWriterFactory>,
    span_writer: Option<SharedWriter>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Telemetry that installs itself process-wide.
    pub fn new() -> Self {
        Self::with_scope(InstallScope::Global)
    }

    /// Telemetry that leaves process globals untouched.
    pub fn local() -> Self {
        Self::with_scope(InstallScope::Local)
    }

    fn with_scope(scope: InstallScope) -> Self {
        Self {
            scope,
            state: RwLock::new(Lifecycle::Uninitialized),
            pending_shutdown: Mutex::new(None),
            log_writer: None,
            span_writer: None,
        }
    }

    /// Sends log records to `writer` instead of stderr.
    pub fn with_log_writer<M>(mut self, writer: M) -> Self
    where
        M: for<'a> MakeWriter<'a> + Clone + Send + Sync + 'static,
    {
        self.log_writer = Some(Arc::new(move || BoxMakeWriter::new(writer.clone())));
        self
    }

    /// Sends console-exported spans to `writer` instead of stdout.
    pub fn with_span_writer<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.span_writer = Some(exporters::shared_writer(writer));
        self
    }

    pub fn scope(&self) -> InstallScope {
        self.scope
    }

    fn read_state(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        match &*self.read_state() {
            Lifecycle::Uninitialized => LifecycleState::Uninitialized,
            Lifecycle::Ready(_) => LifecycleState::Ready,
            Lifecycle::ShutDown(_) => LifecycleState::ShutDown,
        }
    }

    /// Projects a resolved configuration and initializes from it.
    pub fn initialize(&self, config: &ResolvedConfig) -> TelemetryResult<()> {
        let config = ObservabilityConfig::from_resolved(config)?;
        self.initialize_with(&config)
    }

    /// Builds exporters, provider and logger, then publishes them.
    ///
    /// Fails with [`TelemetryError::AlreadyInitialized`] unless this is the
    /// first call. On any error nothing is published and the state is unchanged.
    pub fn initialize_with(&self, config: &ObservabilityConfig) -> TelemetryResult<()> {
        let mut state = self.write_state();
        if !matches!(*state, Lifecycle::Uninitialized) {
            return Err(TelemetryError::AlreadyInitialized);
        }

        let provider = exporters::build_provider(&config.tracer, self.span_writer.clone())?;
        let writer = match &self.log_writer {
            Some(factory) => factory(),
            None => BoxMakeWriter::new(io::stderr),
        };
        let logger = logger::build(
            &config.logger,
            provider.tracer(INSTRUMENTATION_NAME),
            writer,
        );

        if self.scope == InstallScope::Global {
            tracing::dispatcher::set_global_default(logger.dispatch.clone())
                .map_err(|e| TelemetryError::SubscriberAlreadySet(e.to_string()))?;
            opentelemetry::global::set_tracer_provider(provider.clone());
        }

        tracing::dispatcher::with_default(&logger.dispatch, || {
            info!(
                telemetry.scope = ?self.scope,
                telemetry.exporters = ?config.tracer.exporters,
                telemetry.level = %config.logger.level,
                service.name = %config.tracer.app_name,
                "Telemetry initialized"
            );
        });

        *state = Lifecycle::Ready(Installed {
            provider,
            logger,
            config: config.clone(),
        });
        Ok(())
    }

    /// Current log level.
    pub fn level(&self) -> TelemetryResult<LogLevel> {
        match &*self.read_state() {
            Lifecycle::Uninitialized => Err(TelemetryError::NotInitialized),
            Lifecycle::Ready(Installed { logger, .. }) | Lifecycle::ShutDown(logger) => {
                Ok(logger.level.get())
            }
        }
    }

    /// Changes the log level without rebuilding the logger. The change is a
    /// single atomic store, visible to the next record on any thread.
    ///
    /// An unrecognized level leaves the current one in place.
    pub fn set_global_level(&self, level: &str) -> TelemetryResult<()> {
        let parsed: LogLevel = level
            .parse()
            .map_err(|_| TelemetryError::InvalidLevel(level.to_string()))?;

        match &*self.read_state() {
            Lifecycle::Uninitialized => Err(TelemetryError::NotInitialized),
            Lifecycle::Ready(Installed { logger, .. }) | Lifecycle::ShutDown(logger) => {
                logger.level.set(parsed);
                Ok(())
            }
        }
    }

    /// The configuration telemetry was initialized with.
    pub fn config(&self) -> TelemetryResult<ObservabilityConfig> {
        match &*self.read_state() {
            Lifecycle::Uninitialized => Err(TelemetryError::NotInitialized),
            Lifecycle::Ready(installed) => Ok(installed.config.clone()),
            Lifecycle::ShutDown(_) => Err(TelemetryError::ShutDown),
        }
    }

    pub fn tracer_provider(&self) -> TelemetryResult<SdkTracerProvider> {
        self.ready(|installed| installed.provider.clone())
    }

    /// A tracer and logger named `name`, backed by the installed provider
    /// and subscriber.
    pub fn observer(&self, name: &str) -> TelemetryResult<Observer> {
        self.ready(|installed| {
            Observer::new(
                name,
                installed.provider.tracer(name.to_string()),
                installed.logger.dispatch.clone(),
            )
        })
    }

    fn ready<T>(&self, f: impl FnOnce(&Installed) -> T) -> TelemetryResult<T> {
        match &*self.read_state() {
            Lifecycle::Uninitialized => Err(TelemetryError::NotInitialized),
            Lifecycle::Ready(installed) => Ok(f(installed)),
            Lifecycle::ShutDown(_) => Err(TelemetryError::ShutDown),
        }
    }

    /// Exports buffered spans. A no-op unless telemetry is ready.
    pub async fn flush(&self, timeout: Duration) -> TelemetryResult<()> {
        let Ok(provider) = self.tracer_provider() else {
            return Ok(());
        };

        let task = tokio::task::spawn_blocking(move || provider.force_flush());
        match with_deadline("flush", timeout, task).await? {
            Deadline::Finished(Ok(())) => Ok(()),
            Deadline::Finished(Err(OTelSdkError::Timeout(_))) | Deadline::Elapsed(_) => {
                Err(TelemetryError::Timeout {
                    operation: "flush",
                    timeout,
                })
            }
            Deadline::Finished(Err(e)) => {
                self.log(|| warn!(error = %e, "Trace provider flush failed"));
                Err(TelemetryError::Flush(e.to_string()))
            }
        }
    }

    /// Flushes and releases the trace provider. A no-op unless telemetry is
    /// ready.
    ///
    /// On timeout the state stays ready and the provider keeps shutting down
    /// in the background; observers issued meanwhile drop their spans. Calling
    /// `shutdown` again waits for that same shutdown instead of starting a
    /// new one.
    pub async fn shutdown(&self, timeout: Duration) -> TelemetryResult<()> {
        let Ok(provider) = self.tracer_provider() else {
            return Ok(());
        };

        let pending = self
            .pending_shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let task =
            pending.unwrap_or_else(|| tokio::task::spawn_blocking(move || provider.shutdown()));

        match with_deadline("shutdown", timeout, task).await? {
            Deadline::Finished(Ok(())) | Deadline::Finished(Err(OTelSdkError::AlreadyShutdown)) => {}
            Deadline::Finished(Err(OTelSdkError::Timeout(_))) => {
                return Err(TelemetryError::Timeout {
                    operation: "shutdown",
                    timeout,
                })
            }
            Deadline::Finished(Err(e)) => return Err(TelemetryError::Shutdown(e.to_string())),
            Deadline::Elapsed(task) => {
                *self
                    .pending_shutdown
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(task);
                return Err(TelemetryError::Timeout {
                    operation: "shutdown",
                    timeout,
                });
            }
        }

        let mut state = self.write_state();
        if let Lifecycle::Ready(installed) = &*state {
            let logger = installed.logger.clone();
            tracing::dispatcher::with_default(&logger.dispatch, || {
                info!("Telemetry shut down");
            });
            *state = Lifecycle::ShutDown(logger);
        }
        Ok(())
    }

    fn log(&self, f: impl FnOnce()) {
        match &*self.read_state() {
            Lifecycle::Ready(Installed { logger, .. }) | Lifecycle::ShutDown(logger) => {
                tracing::dispatcher::with_default(&logger.dispatch, f)
            }
            Lifecycle::Uninitialized => f(),
        }
    }
}

enum Deadline {
    Finished(OTelSdkResult),
    /// The task is still running; the handle lets a later call wait for it.
    Elapsed(JoinHandle<OTelSdkResult>),
}

/// Waits at most `timeout` for a blocking provider operation.
async fn with_deadline(
    operation: &'static str,
    timeout: Duration,
    mut task: JoinHandle<OTelSdkResult>,
) -> TelemetryResult<Deadline> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => Ok(Deadline::Finished(result)),
        Ok(Err(join)) => Err(task_failed(operation, join)),
        Err(_) => Ok(Deadline::Elapsed(task)),
    }
}

fn task_failed(operation: &'static str, join: JoinError) -> TelemetryError {
    let reason = format!("{operation} task failed: {join}");
    match operation {
        "flush" => TelemetryError::Flush(reason),
        _ => TelemetryError::Shutdown(reason),
    }
}
