use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use lookout_config::{Overrides, ViolationKind};
use lookout_observability::schema::{LOG, LOG_COLOR, LOG_FORMAT, OTEL, OTEL_EXPORTERS, OTLP, OTLP_HOST};
use lookout_observability::*;
use opentelemetry::trace::{Span, Tracer};

fn resolved(overrides: Overrides) -> lookout_config::ResolvedConfig {
    registry().unwrap().resolve(&overrides).unwrap()
}

struct Captured {
    telemetry: Telemetry,
    logs: LogCapture,
    spans: LogCapture,
}

fn captured() -> Captured {
    let logs = LogCapture::new();
    let spans = LogCapture::new();
    let telemetry = Telemetry::local()
        .with_log_writer(logs.clone())
        .with_span_writer(spans.clone());
    Captured {
        telemetry,
        logs,
        spans,
    }
}

#[tokio::test]
async fn test_console_exporter_end_to_end() {
    let Captured {
        telemetry,
        logs,
        spans,
    } = captured();
    telemetry.initialize(&resolved(Overrides::new())).unwrap();

    let observer = telemetry.observer("checkout").unwrap();
    let mut span = observer.tracer().start("reserve-stock");
    span.set_attribute(opentelemetry::KeyValue::new("sku", "A-1"));
    span.end();
    observer.logger().info("stock reserved");

    telemetry.flush(Duration::from_secs(5)).await.unwrap();

    let exported = spans.records();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0]["name"], "reserve-stock");
    assert_eq!(exported[0]["attributes"]["sku"], "A-1");
    assert_eq!(exported[0]["scope"], "checkout");
    assert_eq!(exported[0]["resource"]["service.name"], "unknown_service");

    let app_id = telemetry.config().unwrap().logger.app_id;
    let records = logs.records();
    let record = records
        .iter()
        .find(|r| r["fields"]["message"] == "stock reserved")
        .unwrap();
    assert_eq!(record["id"], app_id.as_str());
    assert_eq!(record["fields"]["logger"], "checkout");
    assert!(records.iter().all(|r| r["id"] == app_id.as_str()));

    telemetry.shutdown(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_tracing_spans_reach_exporter() {
    let Captured {
        telemetry, spans, ..
    } = captured();
    telemetry.initialize(&resolved(Overrides::new())).unwrap();

    let observer = telemetry.observer("jobs").unwrap();
    observer.logger().in_scope(|| {
        let span = tracing::info_span!("nightly-report");
        let _entered = span.enter();
        tracing::info!("report generated");
    });

    telemetry.flush(Duration::from_secs(5)).await.unwrap();
    let exported = spans.records();
    let report = exported.iter().find(|s| s["name"] == "nightly-report").unwrap();
    assert!(report["events"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["name"] == "report generated"));
}

#[tokio::test]
async fn test_second_initialize_is_rejected() {
    let Captured {
        telemetry, spans, ..
    } = captured();
    let config = resolved(Overrides::new());
    telemetry.initialize(&config).unwrap();
    let first_id = telemetry.config().unwrap().tracer.app_id;

    assert!(matches!(
        telemetry.initialize(&config),
        Err(TelemetryError::AlreadyInitialized)
    ));
    assert_eq!(telemetry.config().unwrap().tracer.app_id, first_id);

    // the first provider is still the live one
    telemetry.observer("retained").unwrap().tracer().start("still-here").end();
    telemetry.flush(Duration::from_secs(5)).await.unwrap();
    assert_eq!(spans.records().len(), 1);
}

#[test]
fn test_concurrent_initialize_has_one_winner() {
    let telemetry = Arc::new(Telemetry::local().with_log_writer(LogCapture::new()));
    let config = ObservabilityConfig::from_resolved(&resolved(
        Overrides::new().with(OTEL, OTEL_EXPORTERS, Vec::<String>::new()),
    ))
    .unwrap();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let telemetry = Arc::clone(&telemetry);
            let config = config.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                telemetry.initialize_with(&config)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, TelemetryError::AlreadyInitialized)));
}

#[tokio::test]
async fn test_empty_exporter_list_is_noop() {
    let Captured {
        telemetry, spans, ..
    } = captured();
    telemetry
        .initialize(&resolved(
            Overrides::new().with(OTEL, OTEL_EXPORTERS, Vec::<String>::new()),
        ))
        .unwrap();

    let observer = telemetry.observer("quiet").unwrap();
    let mut span = observer.tracer().start("ignored");
    assert!(!span.is_recording());
    record_error(&mut span, &io::Error::new(io::ErrorKind::Other, "boom"));
    span.end();

    telemetry.flush(Duration::from_secs(5)).await.unwrap();
    assert!(spans.contents().is_empty());
}

#[test]
fn test_invalid_exporter_fails_before_bootstrap() {
    let overrides = Overrides::new().with(OTEL, OTEL_EXPORTERS, ["invalid"]);
    let err = registry().unwrap().resolve(&overrides).unwrap_err();
    assert!(matches!(
        err.find(OTEL, OTEL_EXPORTERS).unwrap().kind,
        ViolationKind::NotInEnumeration { ref value, .. } if value == "invalid"
    ));

    let telemetry = Telemetry::local();
    assert_eq!(telemetry.state(), LifecycleState::Uninitialized);
    assert!(matches!(
        telemetry.observer("app"),
        Err(TelemetryError::NotInitialized)
    ));
}

#[test]
fn test_otlp_requires_host() {
    let err = registry()
        .unwrap()
        .resolve(
            &Overrides::new()
                .with(OTEL, OTEL_EXPORTERS, ["otlp"])
                .with(OTLP, OTLP_HOST, ""),
        )
        .unwrap_err();
    assert_eq!(err.violations().len(), 1);
    assert_eq!(err.violations()[0].key(), "otlp.host");
    assert_eq!(err.violations()[0].kind, ViolationKind::MissingRequired);

    let config = resolved(Overrides::new().with(OTEL, OTEL_EXPORTERS, ["console"]));
    assert!(!config.contains(OTLP, OTLP_HOST));
}

#[tokio::test]
async fn test_level_changes_survive_shutdown() {
    let Captured {
        telemetry, logs, ..
    } = captured();
    telemetry.initialize(&resolved(Overrides::new())).unwrap();
    let logger = telemetry.observer("worker").unwrap().logger().clone();

    logger.debug("hidden");
    telemetry.set_global_level("debug").unwrap();
    logger.debug("visible");
    assert!(telemetry.set_global_level("loud").is_err());
    assert_eq!(telemetry.level().unwrap(), LogLevel::Debug);

    telemetry.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(telemetry.state(), LifecycleState::ShutDown);
    assert!(matches!(telemetry.observer("late"), Err(TelemetryError::ShutDown)));
    assert!(matches!(
        telemetry.initialize(&resolved(Overrides::new())),
        Err(TelemetryError::AlreadyInitialized)
    ));

    telemetry.set_global_level("error").unwrap();
    logger.warn("suppressed");
    logger.error("still logging");

    let messages: Vec<String> = logs
        .records()
        .iter()
        .filter(|r| r["fields"]["logger"] == "worker")
        .map(|r| r["fields"]["message"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(messages, vec!["visible", "still logging"]);

    // a second shutdown is a no-op
    telemetry.shutdown(Duration::from_secs(5)).await.unwrap();
}

fn worker_messages(logs: &LogCapture, logger: &str) -> Vec<String> {
    logs.records()
        .iter()
        .filter(|r| r["fields"]["logger"] == logger)
        .map(|r| r["fields"]["message"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_level_can_be_lowered_after_raising() {
    let Captured {
        telemetry, logs, ..
    } = captured();
    telemetry
        .initialize(&resolved(
            Overrides::new().with(OTEL, OTEL_EXPORTERS, Vec::<String>::new()),
        ))
        .unwrap();
    let logger = telemetry.observer("toggle").unwrap().logger().clone();

    telemetry.set_global_level("debug").unwrap();
    logger.debug("first");
    telemetry.set_global_level("error").unwrap();
    logger.debug("dropped");
    telemetry.set_global_level("debug").unwrap();
    logger.debug("second");

    assert_eq!(worker_messages(&logs, "toggle"), vec!["first", "second"]);
}

#[test]
fn test_concurrent_level_changes_stay_consistent() {
    let Captured {
        telemetry, logs, ..
    } = captured();
    telemetry
        .initialize(&resolved(
            Overrides::new().with(OTEL, OTEL_EXPORTERS, Vec::<String>::new()),
        ))
        .unwrap();
    let telemetry = Arc::new(telemetry);
    let levels = ["debug", "info", "warn", "error"];
    let barrier = Arc::new(Barrier::new(levels.len() * 4));

    let handles: Vec<_> = (0..levels.len() * 4)
        .map(|i| {
            let telemetry = Arc::clone(&telemetry);
            let barrier = Arc::clone(&barrier);
            let level = levels[i % levels.len()];
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    telemetry.set_global_level(level).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let logger = telemetry.observer("race").unwrap().logger().clone();
    let all = [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error];
    for level in all {
        logger.log(level, level);
    }

    let current = telemetry.level().unwrap();
    let from = all.iter().position(|level| *level == current).unwrap();
    let expected: Vec<String> = all[from..].iter().map(|level| level.to_string()).collect();
    assert_eq!(worker_messages(&logs, "race"), expected);
}

/// Writer whose flush stalls, holding up the exporter.
struct StallingWriter;

impl Write for StallingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        thread::sleep(Duration::from_millis(500));
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_timeout_is_reported() {
    let telemetry = Telemetry::local()
        .with_log_writer(LogCapture::new())
        .with_span_writer(StallingWriter);
    telemetry.initialize(&resolved(Overrides::new())).unwrap();

    telemetry.observer("slow").unwrap().tracer().start("stalls").end();
    let err = telemetry
        .flush(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::Timeout { operation: "flush", .. }));
    assert_eq!(telemetry.state(), LifecycleState::Ready);
    assert!(telemetry.observer("slow").is_ok());
}

#[tokio::test]
async fn test_console_log_format() {
    let Captured {
        telemetry, logs, ..
    } = captured();
    telemetry
        .initialize(&resolved(
            Overrides::new()
                .with(LOG, LOG_FORMAT, "console")
                .with(LOG, LOG_COLOR, false),
        ))
        .unwrap();

    telemetry.observer("cli").unwrap().logger().info("plain text");
    let line = logs
        .lines()
        .into_iter()
        .find(|l| l.contains("plain text"))
        .unwrap();
    assert!(line.starts_with("id="));
    assert!(logs.records().is_empty());
}

/// Stalling writer that records when a flush has gone all the way through.
struct SlowFlush(Arc<AtomicBool>);

impl Write for SlowFlush {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        thread::sleep(Duration::from_millis(500));
        self.0.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_retry_waits_for_pending_shutdown() {
    let flushed = Arc::new(AtomicBool::new(false));
    let telemetry = Telemetry::local()
        .with_log_writer(LogCapture::new())
        .with_span_writer(SlowFlush(Arc::clone(&flushed)));
    telemetry.initialize(&resolved(Overrides::new())).unwrap();
    telemetry.observer("drain").unwrap().tracer().start("pending").end();

    let err = telemetry
        .shutdown(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, TelemetryError::Timeout { operation: "shutdown", .. }));
    assert_eq!(telemetry.state(), LifecycleState::Ready);

    telemetry.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(flushed.load(Ordering::SeqCst));
    assert_eq!(telemetry.state(), LifecycleState::ShutDown);
}
