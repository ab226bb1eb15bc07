#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use mcpwatch::sanitizer::{Capture, Payload};
use mcpwatch::session::{EventType, SanitizedEvent, SessionEvent};
use mcpwatch::telemetry::exporter::BoxFuture;
use mcpwatch::telemetry::{ExportBatch, ExportError, Exporter};
use mcpwatch::{Dispatch, SessionId, Sanitizer};

/// Keeps every delivered batch; can fail the first N attempts or stall.
#[derive(Default)]
pub struct RecordingExporter {
    batches: Mutex<Vec<ExportBatch>>,
    attempted_ids: Mutex<Vec<uuid::Uuid>>,
    failures_left: AtomicU32,
    always_fail: bool,
    stall: Option<Duration>,
}

impl RecordingExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_first(n: u32) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(n),
            ..Default::default()
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            always_fail: true,
            ..Default::default()
        })
    }

    pub fn stalling(stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            stall: Some(stall),
            ..Default::default()
        })
    }

    pub fn batches(&self) -> Vec<ExportBatch> {
        self.batches.lock().clone()
    }

    pub fn events(&self) -> Vec<SanitizedEvent> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.events().to_vec())
            .collect()
    }

    pub fn attempted_ids(&self) -> Vec<uuid::Uuid> {
        self.attempted_ids.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempted_ids.lock().len()
    }
}

impl Exporter for RecordingExporter {
    fn export<'a>(&'a self, batch: &'a ExportBatch) -> BoxFuture<'a, Result<(), ExportError>> {
        Box::pin(async move {
            self.attempted_ids.lock().push(batch.id());
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.always_fail {
                return Err(ExportError::Status(503));
            }
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(ExportError::Status(502));
            }
            self.batches.lock().push(batch.clone());
            Ok(())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToyError {
    pub kind: String,
    pub message: String,
}

impl Capture for ToyError {
    fn capture(&self) -> Payload {
        Payload::from(json!({"message": self.message}))
    }

    fn kind(&self) -> Option<String> {
        Some(self.kind.clone())
    }
}

/// A tiny MCP-like server: `echo` returns its arguments, `fail` errors,
/// `slow` and `list_tools` take `delay` before answering.
#[derive(Clone)]
pub struct ToyServer {
    pub delay: Duration,
}

impl ToyServer {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(10),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Dispatch for ToyServer {
    type Args = Value;
    type Output = Value;
    type Error = ToyError;

    fn invoke(
        &self,
        operation: &str,
        args: Value,
    ) -> impl std::future::Future<Output = Result<Value, ToyError>> + Send {
        let operation = operation.to_string();
        let delay = self.delay;
        async move {
            match operation.as_str() {
                "echo" | "tools/call" => Ok(args),
                "list_tools" | "tools/list" | "slow" => {
                    tokio::time::sleep(delay).await;
                    Ok(json!({"tools": ["forecast"]}))
                }
                "fail" => Err(ToyError {
                    kind: "not_found".to_string(),
                    message: "no such tool".to_string(),
                }),
                other => Err(ToyError {
                    kind: "unknown_operation".to_string(),
                    message: other.to_string(),
                }),
            }
        }
    }
}

pub fn sanitized(session: &str, sequence: u64) -> SanitizedEvent {
    Sanitizer::default().sanitize_event(SessionEvent {
        event_type: EventType::OperationStart,
        session_id: SessionId::from(session),
        sequence,
        timestamp_ms: sequence,
        duration_ms: None,
        operation: Some("echo".to_string()),
        operation_kind: None,
        correlation_id: None,
        outcome: None,
        payload: Payload::Null,
    })
}

/// Polls `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
