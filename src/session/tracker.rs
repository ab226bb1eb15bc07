use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::event::{CloseReason, EventType, OperationKind, Outcome, SessionEvent, Signal};
use crate::sanitizer::Payload;
use crate::telemetry::stats::PipelineStats;
use crate::types::{SessionContext, SessionId};

/// How many recently closed session ids are remembered to reject late signals.
pub const CLOSED_LEDGER_CAPACITY: usize = 4096;

/// An operation still open this many idle timeouts after it started is
/// assumed to have lost its end signal.
pub const STALE_OPERATION_FACTOR: u64 = 4;

/// Lifecycle of one session.
///
/// `Uninitialized` is virtual: it is what `state_of` reports for an id the
/// tracker has never seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    /// At least one operation in flight.
    Active,
    /// Nothing in flight, not closed yet.
    Idle,
    /// Terminal. Never re-opened.
    Closed,
}

#[derive(Debug)]
struct InFlight {
    operation: String,
    kind: OperationKind,
    started_at_ms: u64,
    correlation_id: Option<String>,
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    created_at_ms: u64,
    state: SessionState,
    last_activity_ms: u64,
    in_flight: HashMap<Uuid, InFlight>,
    next_sequence: u64,
    correlation_id: Option<String>,
}

impl Session {
    fn new(context: &SessionContext, at_ms: u64) -> Self {
        Self {
            id: context.session_id.clone(),
            created_at_ms: at_ms,
            state: SessionState::Active,
            last_activity_ms: at_ms,
            in_flight: HashMap::new(),
            next_sequence: 0,
            correlation_id: context.correlation_id.clone(),
        }
    }

    /// Next event for this session, with the next sequence number.
    fn event(&mut self, event_type: EventType, timestamp_ms: u64) -> SessionEvent {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        SessionEvent {
            event_type,
            session_id: self.id.clone(),
            sequence,
            timestamp_ms,
            duration_ms: None,
            operation: None,
            operation_kind: None,
            correlation_id: self.correlation_id.clone(),
            outcome: None,
            payload: Payload::Null,
        }
    }

    // Arrival order drives state; timestamps only ever move activity forward.
    fn touch(&mut self, at_ms: u64) {
        self.last_activity_ms = self.last_activity_ms.max(at_ms);
    }

    fn settle(&mut self) {
        self.state = if self.in_flight.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Active
        };
    }

    fn finish(mut self, at_ms: u64, reason: CloseReason) -> SessionEvent {
        self.state = SessionState::Closed;
        if !self.in_flight.is_empty() {
            debug!(
                session_id = %self.id,
                abandoned = self.in_flight.len(),
                reason = reason.as_str(),
                "Session closed with operations in flight"
            );
        }
        let mut end = self.event(EventType::SessionEnd, at_ms);
        end.duration_ms = Some(at_ms.saturating_sub(self.created_at_ms));
        end.payload = Payload::map([("reason", Payload::from(reason.as_str()))]);
        end
    }
}

/// Bounded memory of closed ids, oldest forgotten first.
#[derive(Debug)]
struct ClosedLedger {
    order: VecDeque<SessionId>,
    members: HashSet<SessionId>,
    capacity: usize,
}

impl ClosedLedger {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            members: HashSet::new(),
            capacity,
        }
    }

    fn insert(&mut self, id: SessionId) {
        if self.capacity == 0 || !self.members.insert(id.clone()) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id);
    }

    fn contains(&self, id: &SessionId) -> bool {
        self.members.contains(id)
    }
}

/// Correlates signals into per-session event timelines.
///
/// Single owner: the tracker worker. Events for one session come out in the
/// arrival order of their signals with gapless sequence numbers.
pub struct SessionTracker {
    sessions: HashMap<SessionId, Session>,
    closed: ClosedLedger,
    idle_timeout_ms: u64,
    stats: Arc<PipelineStats>,
}

impl SessionTracker {
    pub fn new(idle_timeout_ms: u64, stats: Arc<PipelineStats>) -> Self {
        Self::with_ledger_capacity(idle_timeout_ms, CLOSED_LEDGER_CAPACITY, stats)
    }

    pub fn with_ledger_capacity(
        idle_timeout_ms: u64,
        ledger_capacity: usize,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            closed: ClosedLedger::new(ledger_capacity),
            idle_timeout_ms,
            stats,
        }
    }

    pub fn state_of(&self, id: &SessionId) -> SessionState {
        if let Some(session) = self.sessions.get(id) {
            session.state
        } else if self.closed.contains(id) {
            SessionState::Closed
        } else {
            SessionState::Uninitialized
        }
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn in_flight(&self, id: &SessionId) -> usize {
        self.sessions.get(id).map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Applies one signal; returns the events it produced (possibly none).
    pub fn handle(&mut self, signal: Signal) -> Vec<SessionEvent> {
        if self.closed.contains(signal.session_id()) {
            anomaly(&self.stats, signal.session_id(), "signal for closed session");
            return Vec::new();
        }

        let events = match signal {
            Signal::Open { context, at_ms } => self.open(context, at_ms),
            Signal::OperationStart {
                context,
                operation_id,
                operation,
                kind,
                arguments,
                at_ms,
            } => self.operation_start(context, operation_id, operation, kind, arguments, at_ms),
            Signal::OperationEnd {
                session_id,
                operation_id,
                outcome,
                detail,
                at_ms,
            } => self.operation_end(&session_id, operation_id, outcome, detail, at_ms),
            Signal::Close { session_id, at_ms } => self.close(&session_id, at_ms, CloseReason::Closed),
        };

        self.stats.events_emitted(events.len() as u64);
        events
    }

    /// Ends operations that outlived the stale bound as `Cancelled`, then
    /// closes every idle session whose last activity is at least the idle
    /// timeout before `now_ms`.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        let mut events = self.reap_stale_operations(now_ms);
        let timeout = self.idle_timeout_ms;
        let mut expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                s.state == SessionState::Idle
                    && now_ms.saturating_sub(s.last_activity_ms) >= timeout
            })
            .map(|s| s.id.clone())
            .collect();
        expired.sort();

        for id in expired {
            debug!(session_id = %id, "Session idle timeout");
            events.extend(self.close(&id, now_ms, CloseReason::IdleTimeout));
        }
        self.stats.events_emitted(events.len() as u64);
        events
    }

    // An end signal lost to a full intake would otherwise pin its session
    // as Active forever.
    fn reap_stale_operations(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        let stale_after = self.idle_timeout_ms.saturating_mul(STALE_OPERATION_FACTOR);
        let is_stale = |op: &InFlight| now_ms.saturating_sub(op.started_at_ms) >= stale_after;

        let mut ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.in_flight.values().any(is_stale))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();

        let mut events = Vec::new();
        for id in ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            let mut stale: Vec<(u64, Uuid)> = session
                .in_flight
                .iter()
                .filter(|(_, op)| is_stale(*op))
                .map(|(op_id, op)| (op.started_at_ms, *op_id))
                .collect();
            stale.sort();

            for (_, op_id) in stale {
                let Some(op) = session.in_flight.remove(&op_id) else {
                    continue;
                };
                warn!(
                    session_id = %id,
                    operation = %op.operation,
                    started_at_ms = op.started_at_ms,
                    "Operation never ended, closing it as cancelled"
                );
                let mut end = session.event(EventType::OperationEnd, now_ms);
                end.duration_ms = Some(now_ms.saturating_sub(op.started_at_ms));
                end.operation = Some(op.operation);
                end.operation_kind = Some(op.kind);
                end.correlation_id = op.correlation_id;
                end.outcome = Some(Outcome::Cancelled);
                events.push(end);
            }
            session.settle();
        }
        events
    }

    /// Closes every live session. Used on shutdown so exported timelines end.
    pub fn close_all(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.sort();

        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            events.extend(self.close(&id, now_ms, CloseReason::Shutdown));
        }
        self.stats.events_emitted(events.len() as u64);
        events
    }

    fn open(&mut self, context: SessionContext, at_ms: u64) -> Vec<SessionEvent> {
        match self.sessions.entry(context.session_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().touch(at_ms);
                Vec::new()
            }
            Entry::Vacant(entry) => {
                let session = entry.insert(Session::new(&context, at_ms));
                let start = session.event(EventType::SessionStart, at_ms);
                session.settle();
                vec![start]
            }
        }
    }

    fn operation_start(
        &mut self,
        context: SessionContext,
        operation_id: Uuid,
        operation: String,
        kind: OperationKind,
        arguments: Payload,
        at_ms: u64,
    ) -> Vec<SessionEvent> {
        if let Some(session) = self.sessions.get(&context.session_id) {
            if session.in_flight.contains_key(&operation_id) {
                anomaly(&self.stats, &context.session_id, "duplicate operation id");
                return Vec::new();
            }
        }

        let mut events = Vec::with_capacity(2);
        let session = match self.sessions.entry(context.session_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let session = entry.insert(Session::new(&context, at_ms));
                events.push(session.event(EventType::SessionStart, at_ms));
                session
            }
        };

        session.touch(at_ms);
        let correlation_id = context
            .correlation_id
            .or_else(|| session.correlation_id.clone());
        session.in_flight.insert(
            operation_id,
            InFlight {
                operation: operation.clone(),
                kind,
                started_at_ms: at_ms,
                correlation_id: correlation_id.clone(),
            },
        );
        session.settle();

        let mut start = session.event(EventType::OperationStart, at_ms);
        start.operation = Some(operation);
        start.operation_kind = Some(kind);
        start.correlation_id = correlation_id;
        start.payload = arguments;
        events.push(start);
        events
    }

    fn operation_end(
        &mut self,
        session_id: &SessionId,
        operation_id: Uuid,
        outcome: Outcome,
        detail: Payload,
        at_ms: u64,
    ) -> Vec<SessionEvent> {
        let Some(session) = self.sessions.get_mut(session_id) else {
            anomaly(&self.stats, session_id, "operation end for unknown session");
            return Vec::new();
        };
        let Some(op) = session.in_flight.remove(&operation_id) else {
            anomaly(&self.stats, session_id, "operation end for unknown operation");
            return Vec::new();
        };

        session.touch(at_ms);
        let failed = outcome.is_error();

        let mut end = session.event(EventType::OperationEnd, at_ms);
        end.duration_ms = Some(at_ms.saturating_sub(op.started_at_ms));
        end.operation = Some(op.operation.clone());
        end.operation_kind = Some(op.kind);
        end.correlation_id = op.correlation_id.clone();
        end.outcome = Some(outcome.clone());

        let mut events = Vec::with_capacity(2);
        if failed {
            events.push(end);
            let mut error = session.event(EventType::Error, at_ms);
            error.operation = Some(op.operation);
            error.operation_kind = Some(op.kind);
            error.correlation_id = op.correlation_id;
            error.outcome = Some(outcome);
            error.payload = detail;
            events.push(error);
        } else {
            end.payload = detail;
            events.push(end);
        }

        session.settle();
        events
    }

    fn close(&mut self, session_id: &SessionId, at_ms: u64, reason: CloseReason) -> Vec<SessionEvent> {
        let Some(session) = self.sessions.remove(session_id) else {
            anomaly(&self.stats, session_id, "close for unknown session");
            return Vec::new();
        };
        self.closed.insert(session_id.clone());
        vec![session.finish(at_ms, reason)]
    }
}

fn anomaly(stats: &PipelineStats, session_id: &SessionId, reason: &str) {
    stats.anomaly();
    warn!(session_id = %session_id, reason, "Rejected telemetry signal");
}
