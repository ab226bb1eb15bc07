//! Request-path instrumentation.
//!
//! Wrapping a `Dispatch` server adds only a channel `try_send`, a hash for
//! sampling and payload capture to each call. Nothing here awaits telemetry.

pub mod context;
pub mod dispatch;
pub mod layer;

pub use context::{current_session, with_session};
pub use dispatch::{dispatch_fn, Dispatch, FnDispatch};
pub use layer::{InstrumentationOptions, InstrumentedServer, Sampler, SignalSink};
