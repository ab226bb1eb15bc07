use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::event::{SessionEvent, Signal};
use super::tracker::SessionTracker;
use crate::sanitizer::Sanitizer;
use crate::telemetry::queue::EventQueue;
use crate::types::now_ms;

/// Owns the tracker. Signals in, sanitized events out to the export queue.
pub struct SessionWorker {
    tracker: SessionTracker,
    sanitizer: Sanitizer,
    queue: Arc<EventQueue>,
    sweep_every: Duration,
}

impl SessionWorker {
    pub fn new(
        tracker: SessionTracker,
        sanitizer: Sanitizer,
        queue: Arc<EventQueue>,
        sweep_every: Duration,
    ) -> Self {
        Self {
            tracker,
            sanitizer,
            queue,
            sweep_every,
        }
    }

    /// Driver loop. Runs until `shutdown` fires or every sender is gone, then
    /// drains the intake and closes every live session.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Signal>,
        shutdown: CancellationToken,
    ) -> SessionTracker {
        info!(sweep_ms = self.sweep_every.as_millis() as u64, "Session worker started");

        let mut sweep = interval(self.sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        sweep.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Session worker shutdown requested");
                    break;
                }

                signal = rx.recv() => {
                    match signal {
                        Some(signal) => {
                            let events = self.tracker.handle(signal);
                            self.forward(events);
                        }
                        None => break,
                    }
                }

                _ = sweep.tick() => {
                    let events = self.tracker.sweep(now_ms());
                    self.forward(events);
                }
            }
        }

        // Signals already accepted still count.
        rx.close();
        while let Some(signal) = rx.recv().await {
            let events = self.tracker.handle(signal);
            self.forward(events);
        }

        let closing = self.tracker.close_all(now_ms());
        let closed = closing.len();
        self.forward(closing);
        info!(closed_sessions = closed, "Session worker stopped");
        self.tracker
    }

    fn forward(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.queue.push(self.sanitizer.sanitize_event(event));
        }
    }
}
