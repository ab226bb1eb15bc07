use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use super::stats::PipelineStats;
use crate::session::event::SanitizedEvent;

/// Bounded FIFO between the session worker and the exporter.
///
/// Never blocks a producer: when full, the oldest event is evicted and counted.
pub struct EventQueue {
    events: Mutex<VecDeque<SanitizedEvent>>,
    capacity: usize,
    notify: Notify,
    stats: Arc<PipelineStats>,
}

impl EventQueue {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            notify: Notify::new(),
            stats,
        }
    }

    /// Appends an event; returns the evicted one if the queue was full.
    pub fn push(&self, event: SanitizedEvent) -> Option<SanitizedEvent> {
        let evicted = {
            let mut events = self.events.lock();
            let evicted = if events.len() >= self.capacity {
                events.pop_front()
            } else {
                None
            };
            events.push_back(event);
            evicted
        };

        if let Some(old) = &evicted {
            self.stats.event_evicted();
            trace!(session_id = %old.session_id(), sequence = old.sequence(), "Evicted oldest queued event");
        }
        self.notify.notify_one();
        evicted
    }

    /// Removes up to `max` events from the front, oldest first.
    pub fn drain_up_to(&self, max: usize) -> Vec<SanitizedEvent> {
        let mut events = self.events.lock();
        let n = max.min(events.len());
        events.drain(..n).collect()
    }

    /// Removes everything. Returns how many events were dropped.
    pub fn clear(&self) -> usize {
        let mut events = self.events.lock();
        let n = events.len();
        events.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resolves after the next `push` (or immediately if one happened since
    /// the last wait).
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitizer::{Payload, Sanitizer};
    use crate::session::event::{EventType, SessionEvent};
    use crate::types::SessionId;

    fn event(sequence: u64) -> SanitizedEvent {
        Sanitizer::default().sanitize_event(SessionEvent {
            event_type: EventType::OperationStart,
            session_id: SessionId::from("s1"),
            sequence,
            timestamp_ms: sequence,
            duration_ms: None,
            operation: None,
            operation_kind: None,
            correlation_id: None,
            outcome: None,
            payload: Payload::Null,
        })
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let stats = Arc::new(PipelineStats::new());
        let queue = EventQueue::new(3, stats.clone());
        for seq in 0..3 {
            assert!(queue.push(event(seq)).is_none());
        }
        let evicted = queue.push(event(3)).expect("oldest evicted");
        assert_eq!(evicted.sequence(), 0);
        assert_eq!(queue.len(), 3);
        assert_eq!(stats.snapshot().events_evicted, 1);

        let left: Vec<u64> = queue.drain_up_to(10).iter().map(|e| e.sequence()).collect();
        assert_eq!(left, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_respects_limit() {
        let queue = EventQueue::new(10, Arc::new(PipelineStats::new()));
        for seq in 0..5 {
            queue.push(event(seq));
        }
        assert_eq!(queue.drain_up_to(2).len(), 2);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.clear(), 3);
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = Arc::new(EventQueue::new(4, Arc::new(PipelineStats::new())));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        tokio::task::yield_now().await;
        queue.push(event(0));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("woken")
            .unwrap();
    }
}
