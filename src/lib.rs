pub mod config;
pub mod instrumentation;
pub mod pipeline;
pub mod sanitizer;
pub mod session;
pub mod telemetry;
pub mod types;

pub use config::{ConfigError, ConfigValidator, ExporterKind, TelemetryConfig, ValidatedConfig};
pub use instrumentation::{dispatch_fn, with_session, Dispatch, InstrumentedServer};
pub use pipeline::{instrument_server, ObservabilityInstance, PipelineError};
pub use sanitizer::{Capture, Payload, SanitizationRules, Sanitizer};
pub use session::{EventType, SanitizedEvent, SessionEvent, SessionTracker};
pub use telemetry::{Exporter, StatsSnapshot, TelemetryManager};
pub use types::{AuthConfig, CredentialProvider, SessionContext, SessionId};
