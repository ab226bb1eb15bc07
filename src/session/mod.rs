//! Session correlation.
//!
//! Instrumentation emits loose `Signal`s; the tracker turns them into ordered
//! per-session event timelines. Exactly one task owns the tracker, so no
//! session state is ever shared or locked.

pub mod event;
pub mod tracker;
pub mod worker;

pub use event::{
    CloseReason, EventType, OperationKind, Outcome, SanitizedEvent, SessionEvent, Signal,
};
pub use tracker::{SessionState, SessionTracker, CLOSED_LEDGER_CAPACITY, STALE_OPERATION_FACTOR};
pub use worker::SessionWorker;
