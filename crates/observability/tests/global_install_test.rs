//! Installs process-wide state, so it lives in its own test binary.

use std::time::Duration;

use lookout_config::Overrides;
use lookout_observability::*;
use opentelemetry::trace::{Span, Tracer, TracerProvider as _};

#[tokio::test]
async fn test_global_install() {
    let logs = LogCapture::new();
    let spans = LogCapture::new();
    let telemetry = Telemetry::new()
        .with_log_writer(logs.clone())
        .with_span_writer(spans.clone());
    assert_eq!(telemetry.scope(), InstallScope::Global);

    let config = registry().unwrap().resolve(&Overrides::new()).unwrap();
    telemetry.initialize(&config).unwrap();

    // plain macros reach the installed subscriber
    tracing::info!(order.id = 42, "global record");
    let app_id = telemetry.config().unwrap().logger.app_id;
    let record = logs
        .records()
        .into_iter()
        .find(|r| r["fields"]["message"] == "global record")
        .unwrap();
    assert_eq!(record["id"], app_id.as_str());

    // and so does the OpenTelemetry global provider
    let mut span = opentelemetry::global::tracer_provider()
        .tracer("global")
        .start("via-global");
    assert!(span.is_recording());
    span.end();
    telemetry.flush(Duration::from_secs(5)).await.unwrap();
    assert!(spans.records().iter().any(|s| s["name"] == "via-global"));

    // a second global install cannot take over the process
    let rival = Telemetry::new().with_log_writer(LogCapture::new());
    let err = rival.initialize(&config).unwrap_err();
    assert!(matches!(err, TelemetryError::SubscriberAlreadySet(_)));
    assert_eq!(rival.state(), LifecycleState::Uninitialized);

    telemetry.set_global_level("warn").unwrap();
    tracing::info!("dropped");
    tracing::warn!("kept");
    let messages: Vec<_> = logs
        .records()
        .into_iter()
        .map(|r| r["fields"]["message"].clone())
        .collect();
    assert!(!messages.iter().any(|m| m == "dropped"));
    assert!(messages.iter().any(|m| m == "kept"));

    telemetry.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(telemetry.state(), LifecycleState::ShutDown);
}
