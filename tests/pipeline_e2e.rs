mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{eventually, RecordingExporter, ToyServer};
use mcpwatch::session::{EventType, SanitizedEvent};
use mcpwatch::{
    ConfigValidator, Dispatch, ExporterKind, ObservabilityInstance, PipelineError,
    SessionContext, TelemetryConfig, ValidatedConfig,
};

fn config(tweak: impl FnOnce(&mut TelemetryConfig)) -> ValidatedConfig {
    let mut config = TelemetryConfig {
        service_name: "toy".to_string(),
        exporter: ExporterKind::Console,
        batch_max_size: 100,
        batch_max_wait_ms: 1_000,
        retry_initial_backoff_ms: 1,
        retry_max_backoff_ms: 5,
        ..Default::default()
    };
    tweak(&mut config);
    ConfigValidator::validate(config).unwrap()
}

fn start(config: ValidatedConfig) -> (ObservabilityInstance, Arc<RecordingExporter>) {
    let exporter = RecordingExporter::new();
    let instance = ObservabilityInstance::builder(config)
        .with_exporter(exporter.clone())
        .start()
        .unwrap();
    (instance, exporter)
}

fn by_session(events: Vec<SanitizedEvent>) -> BTreeMap<String, Vec<SanitizedEvent>> {
    let mut grouped: BTreeMap<String, Vec<SanitizedEvent>> = BTreeMap::new();
    for event in events {
        grouped
            .entry(event.session_id().to_string())
            .or_default()
            .push(event);
    }
    grouped
}

#[tokio::test]
async fn test_single_call_session_lands_in_one_batch() {
    let (instance, exporter) = start(config(|_| {}));
    let server = instance.instrument(ToyServer::with_delay(Duration::from_millis(200)));
    let ctx = SessionContext::new("s1");

    server.invoke_in(&ctx, "list_tools", json!({})).await.unwrap();
    server.close_session(&ctx.session_id);
    instance.shutdown().await;

    let batches = exporter.batches();
    assert_eq!(batches.len(), 1, "expected exactly one batch");
    let events = batches[0].events();
    let types: Vec<EventType> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![
            EventType::SessionStart,
            EventType::OperationStart,
            EventType::OperationEnd,
            EventType::SessionEnd
        ]
    );
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence()).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    assert!(events.iter().all(|e| e.session_id().as_str() == "s1"));

    let duration = events[2].duration_ms().unwrap();
    assert!(duration >= 190, "duration {}", duration);
    assert_eq!(events[2].operation(), Some("list_tools"));
    assert_eq!(events[3].payload(), &json!({"reason": "closed"}));
}

#[tokio::test]
async fn test_sensitive_arguments_are_redacted_before_export() {
    let (instance, exporter) = start(config(|_| {}));
    let server = instance.instrument(ToyServer::new());
    let ctx = SessionContext::new("s1");

    let result = server
        .invoke_in(&ctx, "tools/call", json!({"api_key": "sk-12345", "query": "hello"}))
        .await
        .unwrap();
    // The caller still gets the untouched value back.
    assert_eq!(result["api_key"], "sk-12345");
    instance.shutdown().await;

    let events = exporter.events();
    let start = events
        .iter()
        .find(|e| e.event_type() == EventType::OperationStart)
        .unwrap();
    assert_eq!(start.payload(), &json!({"api_key": "<REDACTED>", "query": "hello"}));

    let wire = serde_json::to_string(&events).unwrap();
    assert!(!wire.contains("sk-12345"));
}

#[tokio::test]
async fn test_concurrent_sessions_stay_ordered() {
    let (instance, exporter) = start(config(|c| c.batch_max_size = 7));
    let server = Arc::new(instance.instrument(ToyServer::new()));

    let mut tasks = Vec::new();
    for i in 0..5 {
        let server = server.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = SessionContext::new(format!("session-{}", i));
            for n in 0..3 {
                server
                    .invoke_in(&ctx, "tools/call", json!({"n": n}))
                    .await
                    .unwrap();
            }
            server.close_session(&ctx.session_id);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    instance.shutdown().await;

    let grouped = by_session(exporter.events());
    assert_eq!(grouped.len(), 5);
    for (session, events) in grouped {
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, (0..8).collect::<Vec<_>>(), "{}", session);
        assert_eq!(events[0].event_type(), EventType::SessionStart);
        assert_eq!(events[7].event_type(), EventType::SessionEnd);
    }
    assert_eq!(instance.stats().events_delivered, 40);
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let (instance, exporter) = start(config(|_| {}));
    let server = instance.instrument(ToyServer::new());
    server
        .invoke_in(&SessionContext::new("open"), "echo", json!({}))
        .await
        .unwrap();

    instance.shutdown().await;
    instance.shutdown().await;

    let events = exporter.events();
    let last = events.last().unwrap();
    assert_eq!(last.event_type(), EventType::SessionEnd);
    assert_eq!(last.payload(), &json!({"reason": "shutdown"}));

    // Intake is closed now; the call still answers.
    let out = server
        .invoke_in(&SessionContext::new("late"), "echo", json!(5))
        .await
        .unwrap();
    assert_eq!(out, json!(5));
    assert_eq!(instance.stats().signals_dropped, 2);
}

#[tokio::test]
async fn test_idle_session_times_out() {
    let (instance, exporter) = start(config(|c| {
        c.session_idle_timeout_ms = 100;
        c.idle_sweep_interval_ms = 20;
        c.batch_max_wait_ms = 20;
    }));
    let server = instance.instrument(ToyServer::new());
    let ctx = SessionContext::new("sleepy");
    server.invoke_in(&ctx, "echo", json!({})).await.unwrap();

    let ended = eventually(Duration::from_secs(3), || {
        exporter
            .events()
            .iter()
            .any(|e| e.event_type() == EventType::SessionEnd)
    })
    .await;
    assert!(ended, "idle session was never closed");

    // The id is retired: later calls are rejected by the tracker.
    server.invoke_in(&ctx, "echo", json!({})).await.unwrap();
    instance.shutdown().await;

    let events = exporter.events();
    let ends: Vec<&SanitizedEvent> = events
        .iter()
        .filter(|e| e.event_type() == EventType::SessionEnd)
        .collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].payload(), &json!({"reason": "idle_timeout"}));
    assert_eq!(instance.stats().anomalies, 2);
}

#[tokio::test]
async fn test_failed_operation_exports_error_event() {
    let (instance, exporter) = start(config(|_| {}));
    let server = instance.instrument(ToyServer::new());
    let ctx = SessionContext::new("s1");
    assert!(server.invoke_in(&ctx, "fail", json!({})).await.is_err());
    instance.shutdown().await;

    let events = exporter.events();
    let error = events
        .iter()
        .find(|e| e.event_type() == EventType::Error)
        .expect("error event");
    assert_eq!(error.payload(), &json!({"message": "no such tool"}));
    let wire = serde_json::to_value(error).unwrap();
    assert_eq!(wire["outcome"], json!({"status": "error", "kind": "not_found"}));
}

#[tokio::test]
async fn test_task_local_sessions_through_dispatch() {
    let (instance, exporter) = start(config(|_| {}));
    let server = instance.instrument(ToyServer::new());

    mcpwatch::with_session(SessionContext::new("scoped"), async {
        server.invoke("echo", json!({"x": 1})).await.unwrap();
    })
    .await;
    server.invoke("echo", json!({"x": 2})).await.unwrap();
    instance.shutdown().await;

    let grouped = by_session(exporter.events());
    assert_eq!(grouped.keys().collect::<Vec<_>>(), vec!["scoped"]);
    assert_eq!(instance.stats().untracked_calls, 1);
}

#[test]
fn test_start_requires_runtime() {
    match ObservabilityInstance::start(config(|_| {})) {
        Err(PipelineError::NoRuntime) => {}
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("started without a runtime"),
    }
}

#[test]
fn test_instrument_server_rejects_invalid_config() {
    let config = TelemetryConfig {
        sample_rate: 2.0,
        ..Default::default()
    };
    assert!(matches!(
        mcpwatch::instrument_server(ToyServer::new(), config),
        Err(PipelineError::Config(_))
    ));
}
