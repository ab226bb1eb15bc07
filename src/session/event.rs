use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sanitizer::Payload;
use crate::types::{SessionContext, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    SessionEnd,
    OperationStart,
    OperationEnd,
    Error,
}

/// Protocol family of an operation, derived from its method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Tool,
    Resource,
    Prompt,
    Other,
}

impl OperationKind {
    pub fn from_operation(name: &str) -> Self {
        let family = name.split(['/', '.']).next().unwrap_or(name);
        match family {
            "tools" | "tool" => OperationKind::Tool,
            "resources" | "resource" => OperationKind::Resource,
            "prompts" | "prompt" => OperationKind::Prompt,
            _ => OperationKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Error { kind: String },
    /// The caller dropped the call before it finished.
    Cancelled,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Closed,
    IdleTimeout,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Closed => "closed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Raw observation produced by instrumentation, before correlation.
#[derive(Debug, Clone)]
pub enum Signal {
    Open {
        context: SessionContext,
        at_ms: u64,
    },
    OperationStart {
        context: SessionContext,
        operation_id: Uuid,
        operation: String,
        kind: OperationKind,
        arguments: Payload,
        at_ms: u64,
    },
    OperationEnd {
        session_id: SessionId,
        operation_id: Uuid,
        outcome: Outcome,
        detail: Payload,
        at_ms: u64,
    },
    Close {
        session_id: SessionId,
        at_ms: u64,
    },
}

impl Signal {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Signal::Open { context, .. } | Signal::OperationStart { context, .. } => {
                &context.session_id
            }
            Signal::OperationEnd { session_id, .. } | Signal::Close { session_id, .. } => {
                session_id
            }
        }
    }

    pub fn at_ms(&self) -> u64 {
        match self {
            Signal::Open { at_ms, .. }
            | Signal::OperationStart { at_ms, .. }
            | Signal::OperationEnd { at_ms, .. }
            | Signal::Close { at_ms, .. } => *at_ms,
        }
    }
}

/// Correlated event with its payload still raw. Handed straight to the sanitizer.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub event_type: EventType,
    pub session_id: SessionId,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub duration_ms: Option<u64>,
    pub operation: Option<String>,
    pub operation_kind: Option<OperationKind>,
    pub correlation_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub payload: Payload,
}

/// The exported unit of telemetry. Only `Sanitizer::sanitize_event` builds one.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEvent {
    event_type: EventType,
    session_id: SessionId,
    sequence: u64,
    #[serde(rename = "timestamp")]
    timestamp_ms: u64,
    duration_ms: Option<u64>,
    operation: Option<String>,
    operation_kind: Option<OperationKind>,
    correlation_id: Option<String>,
    outcome: Option<Outcome>,
    payload: serde_json::Value,
}

impl SanitizedEvent {
    pub(crate) fn seal(event: SessionEvent, payload: serde_json::Value) -> Self {
        Self {
            event_type: event.event_type,
            session_id: event.session_id,
            sequence: event.sequence,
            timestamp_ms: event.timestamp_ms,
            duration_ms: event.duration_ms,
            operation: event.operation,
            operation_kind: event.operation_kind,
            correlation_id: event.correlation_id,
            outcome: event.outcome,
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    pub fn operation_kind(&self) -> Option<OperationKind> {
        self.operation_kind
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
