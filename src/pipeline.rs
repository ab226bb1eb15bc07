//! Wires instrumentation, tracker, sanitizer and export into one running
//! pipeline.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ConfigError, ConfigValidator, ExporterKind, TelemetryConfig, ValidatedConfig};
use crate::instrumentation::{InstrumentationOptions, InstrumentedServer, SignalSink};
use crate::sanitizer::Sanitizer;
use crate::session::{SessionTracker, SessionWorker};
use crate::telemetry::{
    ConsoleExporter, EventQueue, Exporter, HttpExporter, PipelineStats, StatsSnapshot,
    TelemetryManager,
};
use crate::types::CredentialProvider;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build collector client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("no tokio runtime is running")]
    NoRuntime,
}

pub struct PipelineBuilder {
    config: ValidatedConfig,
    exporter: Option<Arc<dyn Exporter>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl PipelineBuilder {
    /// Replaces the exporter chosen by the config.
    pub fn with_exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Replaces the config's `auth` for the HTTP exporter.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Spawns the tracker and export workers on the current runtime.
    pub fn start(self) -> Result<ObservabilityInstance, PipelineError> {
        Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;

        let config = self.config;
        let stats = Arc::new(PipelineStats::new());

        let exporter: Arc<dyn Exporter> = match self.exporter {
            Some(exporter) => exporter,
            None => match config.exporter() {
                ExporterKind::Console => Arc::new(ConsoleExporter),
                ExporterKind::Http => {
                    let endpoint = config.endpoint().cloned().ok_or_else(|| {
                        ConfigError::InvalidEndpoint {
                            endpoint: String::new(),
                            reason: "missing".to_string(),
                        }
                    })?;
                    let credentials: Arc<dyn CredentialProvider> = match self.credentials {
                        Some(credentials) => credentials,
                        None => Arc::new(config.auth().clone()),
                    };
                    Arc::new(HttpExporter::new(
                        endpoint,
                        config.service_name(),
                        config.service_version(),
                        config.export_timeout(),
                        credentials,
                    )?)
                }
            },
        };

        let queue = Arc::new(EventQueue::new(config.queue_capacity(), stats.clone()));
        let manager = TelemetryManager::start(
            config.export().clone(),
            queue.clone(),
            exporter,
            stats.clone(),
        );

        let (tx, rx) = mpsc::channel(config.signal_capacity());
        let tracker = SessionTracker::new(
            config.session_idle_timeout().as_millis() as u64,
            stats.clone(),
        );
        let worker = SessionWorker::new(
            tracker,
            Sanitizer::new(config.rules().clone()),
            queue,
            config.idle_sweep_interval(),
        );
        let tracker_shutdown = CancellationToken::new();
        let tracker_worker = tokio::spawn(worker.run(rx, tracker_shutdown.clone()));

        info!(
            service = config.service_name(),
            version = config.service_version(),
            exporter = ?config.exporter(),
            auth = config.auth().scheme(),
            sample_rate = config.instrumentation().sample_rate,
            "Observability pipeline started"
        );

        Ok(ObservabilityInstance {
            options: config.instrumentation(),
            sink: SignalSink::new(tx, stats.clone()),
            stats,
            manager,
            tracker_shutdown,
            tracker_worker: Mutex::new(Some(tracker_worker)),
        })
    }
}

/// A running pipeline. Call `shutdown` before dropping it to flush.
pub struct ObservabilityInstance {
    options: InstrumentationOptions,
    sink: SignalSink,
    stats: Arc<PipelineStats>,
    manager: TelemetryManager,
    tracker_shutdown: CancellationToken,
    tracker_worker: Mutex<Option<JoinHandle<SessionTracker>>>,
}

impl ObservabilityInstance {
    pub fn builder(config: ValidatedConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            exporter: None,
            credentials: None,
        }
    }

    pub fn start(config: ValidatedConfig) -> Result<Self, PipelineError> {
        Self::builder(config).start()
    }

    pub fn instrument<S>(&self, server: S) -> InstrumentedServer<S> {
        InstrumentedServer::new(server, self.sink.clone(), self.options)
    }

    pub fn sink(&self) -> &SignalSink {
        &self.sink
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// Stops intake, closes live sessions, then flushes within the grace
    /// period. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.tracker_shutdown.cancel();
        let handle = self.tracker_worker.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(tracker) => debug!(live_sessions = tracker.live_sessions(), "Tracker drained"),
                Err(e) => error!("Session worker failed: {:?}", e),
            }
        }
        self.manager.shutdown().await;

        let stats = self.stats.snapshot();
        info!(
            delivered = stats.events_delivered,
            failed = stats.events_failed,
            evicted = stats.events_evicted,
            discarded = stats.events_discarded,
            dropped_signals = stats.signals_dropped,
            "Observability pipeline stopped"
        );
    }
}

/// Validates `config`, starts a pipeline and wraps `server` in one step.
pub fn instrument_server<S>(
    server: S,
    config: TelemetryConfig,
) -> Result<(InstrumentedServer<S>, ObservabilityInstance), PipelineError> {
    let config = ConfigValidator::validate(config)?;
    let instance = ObservabilityInstance::start(config)?;
    Ok((instance.instrument(server), instance))
}
