use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters, shared by every stage through an `Arc`.
///
/// Every loss in the pipeline lands in exactly one of these.
#[derive(Debug, Default)]
pub struct PipelineStats {
    signals_dropped: AtomicU64,
    signals_sampled_out: AtomicU64,
    untracked_calls: AtomicU64,
    anomalies: AtomicU64,
    events_emitted: AtomicU64,
    events_evicted: AtomicU64,
    events_discarded: AtomicU64,
    events_delivered: AtomicU64,
    events_failed: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    delivery_attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Signals lost because the tracker intake was full or closed.
    pub signals_dropped: u64,
    pub signals_sampled_out: u64,
    /// Calls made outside any session context.
    pub untracked_calls: u64,
    /// Late, unknown or malformed signals the tracker rejected.
    pub anomalies: u64,
    pub events_emitted: u64,
    /// Events pushed out of a full export queue (drop-oldest).
    pub events_evicted: u64,
    /// Events still queued when the shutdown grace period ran out.
    pub events_discarded: u64,
    pub events_delivered: u64,
    pub events_failed: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub delivery_attempts: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_dropped(&self) {
        self.signals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn signal_sampled_out(&self) {
        self.signals_sampled_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn untracked_call(&self) {
        self.untracked_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_emitted(&self, n: u64) {
        self.events_emitted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn event_evicted(&self) {
        self.events_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_discarded(&self, n: u64) {
        self.events_discarded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn delivery_attempt(&self) {
        self.delivery_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_delivered(&self, events: u64) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered.fetch_add(events, Ordering::Relaxed);
    }

    pub fn batch_failed(&self, events: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.events_failed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            signals_dropped: self.signals_dropped.load(Ordering::Relaxed),
            signals_sampled_out: self.signals_sampled_out.load(Ordering::Relaxed),
            untracked_calls: self.untracked_calls.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_evicted: self.events_evicted.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            delivery_attempts: self.delivery_attempts.load(Ordering::Relaxed),
        }
    }
}
