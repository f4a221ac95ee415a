//! Builds the `tracing` subscriber that backs every logger handle.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use opentelemetry_sdk::trace::SdkTracer;
use tracing::subscriber::Interest;
use tracing::{Dispatch, Event, Metadata, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::{Context, Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry};

use crate::models::{LogFormat, LogLevel, LoggerConfig, Profile};

type Filtered = Layered<LevelGate, Registry>;

/// The active log level. One atomic shared by the filter and its owner, so a
/// change is a single store seen by the next event.
#[derive(Debug, Clone)]
pub(crate) struct SharedLevel(Arc<AtomicU8>);

impl SharedLevel {
    pub fn new(level: LogLevel) -> Self {
        Self(Arc::new(AtomicU8::new(level.to_u8())))
    }

    pub fn get(&self) -> LogLevel {
        LogLevel::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, level: LogLevel) {
        self.0.store(level.to_u8(), Ordering::SeqCst);
    }
}

/// Filters on [`SharedLevel`] at every event.
///
/// Callsite interest stays `sometimes` and no max level is hinted, so every
/// event reaches `enabled` whether or not this is the global dispatcher.
struct LevelGate(SharedLevel);

impl<S: Subscriber> Layer<S> for LevelGate {
    fn register_callsite(&self, _metadata: &'static Metadata<'static>) -> Interest {
        Interest::sometimes()
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        *metadata.level() <= self.0.get().level_filter()
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        None
    }
}

/// The installed logger: its dispatcher and the level it filters on.
#[derive(Clone)]
pub(crate) struct LoggerState {
    pub dispatch: Dispatch,
    pub level: SharedLevel,
}

/// Prefixes every record with the application id.
///
/// JSON records get an `id` member; console records start with `id=...`.
struct WithAppId<F> {
    inner: F,
    app_id: String,
    app_id_json: String,
    json: bool,
}

impl<F> WithAppId<F> {
    fn new(inner: F, app_id: &str, json: bool) -> Self {
        let app_id_json =
            serde_json::to_string(app_id).unwrap_or_else(|_| format!("\"{}\"", app_id.escape_default()));
        Self {
            inner,
            app_id: app_id.to_string(),
            app_id_json,
            json,
        }
    }
}

impl<S, N, F> FormatEvent<S, N> for WithAppId<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if !self.json {
            if writer.has_ansi_escapes() {
                write!(writer, "\x1b[2mid=\x1b[0m{} ", self.app_id)?;
            } else {
                write!(writer, "id={} ", self.app_id)?;
            }
            return self.inner.format_event(ctx, writer, event);
        }

        let mut line = String::new();
        self.inner.format_event(ctx, Writer::new(&mut line), event)?;
        match line.strip_prefix('{') {
            Some(rest) if rest.starts_with('}') => {
                write!(writer, "{{\"id\":{}{}", self.app_id_json, rest)
            }
            Some(rest) => write!(writer, "{{\"id\":{},{}", self.app_id_json, rest),
            None => writer.write_str(&line),
        }
    }
}

fn fmt_layer(config: &LoggerConfig, writer: BoxMakeWriter) -> Box<dyn Layer<Filtered> + Send + Sync> {
    let detailed = config.profile == Profile::Development;
    let format = tracing_subscriber::fmt::format()
        .with_timer(ChronoUtc::rfc_3339())
        .with_file(detailed)
        .with_line_number(detailed)
        .with_thread_names(detailed);

    match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .event_format(WithAppId::new(
                format.json().with_current_span(true).with_span_list(detailed),
                &config.app_id,
                true,
            ))
            .boxed(),
        LogFormat::Console => tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(config.color)
            .event_format(WithAppId::new(format.with_ansi(config.color), &config.app_id, false))
            .boxed(),
    }
}

/// Composes level filter, formatter and the OpenTelemetry bridge into one
/// dispatcher. Nothing is installed globally here.
pub(crate) fn build(config: &LoggerConfig, tracer: SdkTracer, writer: BoxMakeWriter) -> LoggerState {
    let level = SharedLevel::new(config.level);

    let subscriber = Registry::default()
        .with(LevelGate(level.clone()))
        .with(fmt_layer(config, writer))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    LoggerState {
        dispatch: Dispatch::new(subscriber),
        level,
    }
}
