use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::ExportBatch;
use super::exporter::Exporter;
use super::queue::EventQueue;
use super::retry::RetryPolicy;
use super::stats::PipelineStats;
use crate::session::event::SanitizedEvent;

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub batch_max_size: usize,
    /// Measured from the moment a batch starts forming.
    pub batch_max_wait: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on the final flush.
    pub shutdown_grace: Duration,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            batch_max_size: 100,
            batch_max_wait: Duration::from_millis(1_000),
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_millis(5_000),
        }
    }
}

/// Owns the export worker: batching, retry and delivery off the request path.
pub struct TelemetryManager {
    queue: Arc<EventQueue>,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    // Events drained from the queue whose batch has not resolved yet.
    in_flight: Arc<AtomicU64>,
    grace: Duration,
}

impl TelemetryManager {
    /// Spawns the export worker on the current runtime.
    pub fn start(
        settings: ExportSettings,
        queue: Arc<EventQueue>,
        exporter: Arc<dyn Exporter>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let in_flight = Arc::new(AtomicU64::new(0));
        let grace = settings.shutdown_grace;

        info!(
            batch_max_size = settings.batch_max_size,
            batch_max_wait_ms = settings.batch_max_wait.as_millis() as u64,
            max_attempts = settings.retry.max_attempts,
            "Telemetry manager started"
        );

        let worker = ExportWorker {
            queue: queue.clone(),
            exporter,
            stats: stats.clone(),
            in_flight: in_flight.clone(),
            settings,
        };
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        Self {
            queue,
            stats,
            shutdown,
            worker: Mutex::new(Some(handle)),
            in_flight,
            grace,
        }
    }

    /// Never blocks; a full queue evicts its oldest event.
    pub fn enqueue(&self, event: SanitizedEvent) -> Option<SanitizedEvent> {
        self.queue.push(event)
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Flushes what is queued, bounded by the grace period. Whatever is still
    /// undelivered when the grace runs out is counted as discarded.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let Some(mut handle) = self.worker.lock().take() else {
            return;
        };

        match timeout(self.grace, &mut handle).await {
            Ok(Ok(())) => info!("Telemetry manager stopped"),
            Ok(Err(e)) => error!("Export worker failed: {:?}", e),
            Err(_) => {
                handle.abort();
                let _ = handle.await;
                let queued = self.queue.clear() as u64;
                let pending = self.in_flight.swap(0, Ordering::AcqRel);
                let lost = queued + pending;
                self.stats.events_discarded(lost);
                warn!(
                    grace_ms = self.grace.as_millis() as u64,
                    discarded = lost,
                    "Shutdown grace elapsed, discarding undelivered events"
                );
            }
        }
    }
}

struct ExportWorker {
    queue: Arc<EventQueue>,
    exporter: Arc<dyn Exporter>,
    stats: Arc<PipelineStats>,
    in_flight: Arc<AtomicU64>,
    settings: ExportSettings,
}

impl ExportWorker {
    async fn run(self, shutdown: CancellationToken) {
        let max = self.settings.batch_max_size.max(1);

        loop {
            if self.queue.is_empty() {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = self.queue.notified() => continue,
                }
            }

            // First event is here; the batch window starts now.
            let deadline = Instant::now() + self.settings.batch_max_wait;
            while self.queue.len() < max {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = sleep_until(deadline) => break,
                    _ = self.queue.notified() => {}
                }
            }

            let events = self.queue.drain_up_to(max);
            if !events.is_empty() {
                self.deliver(ExportBatch::seal(events)).await;
            }
        }

        // Final flush.
        loop {
            let events = self.queue.drain_up_to(max);
            if events.is_empty() {
                break;
            }
            self.deliver(ExportBatch::seal(events)).await;
        }
        debug!("Export worker drained");
    }

    /// Sequential attempts on one batch. Exhaustion is counted once.
    async fn deliver(&self, batch: ExportBatch) {
        let size = batch.len() as u64;
        self.in_flight.store(size, Ordering::Release);
        let attempts = self.settings.retry.max_attempts.max(1);

        for attempt in 0..attempts {
            let delay = self.settings.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            self.stats.delivery_attempt();
            match self.exporter.export(&batch).await {
                Ok(()) => {
                    self.in_flight.store(0, Ordering::Release);
                    self.stats.batch_delivered(size);
                    debug!(batch_id = %batch.id(), events = size, attempt = attempt + 1, "Batch delivered");
                    return;
                }
                Err(e) => {
                    warn!(
                        batch_id = %batch.id(),
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Batch delivery failed"
                    );
                }
            }
        }

        self.in_flight.store(0, Ordering::Release);
        self.stats.batch_failed(size);
        error!(batch_id = %batch.id(), events = size, "Dropping batch after exhausting retries");
    }
}
