//! Export side of the pipeline.
//!
//! Sanitized events land in a bounded drop-oldest queue. A single export worker
//! groups them into batches and delivers each batch with retries. Every lost
//! event is counted in `PipelineStats`.
//!
//! # PRIVACY INVARIANT
//! Only `SanitizedEvent`s are accepted here. Exporters never see raw payloads.

pub mod batch;
pub mod exporter;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod stats;

pub use batch::ExportBatch;
pub use exporter::{ConsoleExporter, ExportError, Exporter, HttpExporter};
pub use manager::{ExportSettings, TelemetryManager};
pub use queue::EventQueue;
pub use retry::RetryPolicy;
pub use stats::{PipelineStats, StatsSnapshot};
