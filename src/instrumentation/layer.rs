use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;
use uuid::Uuid;

use super::context::current_session;
use super::dispatch::Dispatch;
use crate::sanitizer::{Capture, Payload};
use crate::session::event::{OperationKind, Outcome, Signal};
use crate::telemetry::stats::PipelineStats;
use crate::types::{now_ms, SessionContext, SessionId};

const DEFAULT_ERROR_KIND: &str = "error";

/// Non-blocking handle into the tracker's intake channel.
#[derive(Clone)]
pub struct SignalSink {
    tx: mpsc::Sender<Signal>,
    stats: Arc<PipelineStats>,
}

impl SignalSink {
    pub fn new(tx: mpsc::Sender<Signal>, stats: Arc<PipelineStats>) -> Self {
        Self { tx, stats }
    }

    /// Hands a signal to the tracker. Returns `false` when it was dropped
    /// because the intake is full or gone; never waits.
    pub fn emit(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                self.stats.signal_dropped();
                trace!(session_id = %signal.session_id(), "Signal intake full, dropping");
                false
            }
            Err(TrySendError::Closed(signal)) => {
                self.stats.signal_dropped();
                trace!(session_id = %signal.session_id(), "Signal intake closed, dropping");
                false
            }
        }
    }

    pub fn open_session(&self, context: &SessionContext) -> bool {
        self.emit(Signal::Open {
            context: context.clone(),
            at_ms: now_ms(),
        })
    }

    pub fn close_session(&self, session_id: &SessionId) -> bool {
        self.emit(Signal::Close {
            session_id: session_id.clone(),
            at_ms: now_ms(),
        })
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }
}

/// Per-session sampling. A session is either fully recorded or not at all.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 1.0 },
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Stable for a given id within one build of the process.
    pub fn admits(&self, session_id: &SessionId) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        let mut hasher = DefaultHasher::new();
        session_id.as_str().hash(&mut hasher);
        (hasher.finish() as f64 / u64::MAX as f64) < self.rate
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InstrumentationOptions {
    pub collect_arguments: bool,
    /// Successful outputs only; error details are always captured.
    pub collect_results: bool,
    pub sample_rate: f64,
}

impl Default for InstrumentationOptions {
    fn default() -> Self {
        Self {
            collect_arguments: true,
            collect_results: true,
            sample_rate: 1.0,
        }
    }
}

/// Wraps a server so every operation is observed without changing what it
/// returns. The wrapped call's value or error comes back untouched.
pub struct InstrumentedServer<S> {
    inner: S,
    sink: SignalSink,
    sampler: Sampler,
    options: InstrumentationOptions,
}

impl<S: Clone> Clone for InstrumentedServer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            sink: self.sink.clone(),
            sampler: self.sampler,
            options: self.options,
        }
    }
}

impl<S> InstrumentedServer<S> {
    pub fn new(inner: S, sink: SignalSink, options: InstrumentationOptions) -> Self {
        Self {
            inner,
            sink,
            sampler: Sampler::new(options.sample_rate),
            options,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn sink(&self) -> &SignalSink {
        &self.sink
    }

    /// Marks the start of a session before its first call.
    pub fn open_session(&self, context: &SessionContext) {
        if self.sampler.admits(&context.session_id) {
            self.sink.open_session(context);
        } else {
            self.sink.stats.signal_sampled_out();
        }
    }

    pub fn close_session(&self, session_id: &SessionId) {
        if self.sampler.admits(session_id) {
            self.sink.close_session(session_id);
        } else {
            self.sink.stats.signal_sampled_out();
        }
    }
}

impl<S: Dispatch> InstrumentedServer<S> {
    /// Runs one operation under an explicit session context.
    pub async fn invoke_in(
        &self,
        context: &SessionContext,
        operation: &str,
        args: S::Args,
    ) -> Result<S::Output, S::Error> {
        if !self.sampler.admits(&context.session_id) {
            // Start and end both skipped.
            self.sink.stats.signal_sampled_out();
            self.sink.stats.signal_sampled_out();
            return self.inner.invoke(operation, args).await;
        }

        let operation_id = Uuid::new_v4();
        let arguments = if self.options.collect_arguments {
            args.capture()
        } else {
            Payload::Null
        };
        self.sink.emit(Signal::OperationStart {
            context: context.clone(),
            operation_id,
            operation: operation.to_string(),
            kind: OperationKind::from_operation(operation),
            arguments,
            at_ms: now_ms(),
        });

        let mut guard = CallGuard {
            sink: &self.sink,
            session_id: &context.session_id,
            operation_id,
            armed: true,
        };
        let result = self.inner.invoke(operation, args).await;
        guard.armed = false;

        let (outcome, detail) = match &result {
            Ok(output) if self.options.collect_results => (Outcome::Success, output.capture()),
            Ok(_) => (Outcome::Success, Payload::Null),
            Err(err) => (
                Outcome::Error {
                    kind: err.kind().unwrap_or_else(|| DEFAULT_ERROR_KIND.to_string()),
                },
                err.capture(),
            ),
        };
        self.sink.emit(Signal::OperationEnd {
            session_id: context.session_id.clone(),
            operation_id,
            outcome,
            detail,
            at_ms: now_ms(),
        });

        result
    }
}

impl<S: Dispatch> Dispatch for InstrumentedServer<S> {
    type Args = S::Args;
    type Output = S::Output;
    type Error = S::Error;

    /// Uses the session from the enclosing `with_session` scope. Calls made
    /// outside any scope pass through unobserved and are counted.
    fn invoke(
        &self,
        operation: &str,
        args: S::Args,
    ) -> impl Future<Output = Result<S::Output, S::Error>> + Send {
        async move {
            match current_session() {
                Some(context) => self.invoke_in(&context, operation, args).await,
                None => {
                    self.sink.stats.untracked_call();
                    self.inner.invoke(operation, args).await
                }
            }
        }
    }
}

// Armed while the wrapped call is pending; a caller dropping the future
// mid-call still yields an operation end.
struct CallGuard<'a> {
    sink: &'a SignalSink,
    session_id: &'a SessionId,
    operation_id: Uuid,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.sink.emit(Signal::OperationEnd {
            session_id: self.session_id.clone(),
            operation_id: self.operation_id,
            outcome: Outcome::Cancelled,
            detail: Payload::Null,
            at_ms: now_ms(),
        });
    }
}
