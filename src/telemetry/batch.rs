use uuid::Uuid;

use crate::session::event::SanitizedEvent;
use crate::types::now_ms;

/// A sealed, ordered group of events delivered as one unit.
///
/// Immutable once built; retries resend the exact same batch and id.
#[derive(Debug, Clone)]
pub struct ExportBatch {
    id: Uuid,
    sealed_at_ms: u64,
    events: Vec<SanitizedEvent>,
}

impl ExportBatch {
    pub fn seal(events: Vec<SanitizedEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sealed_at_ms: now_ms(),
            events,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sealed_at_ms(&self) -> u64 {
        self.sealed_at_ms
    }

    pub fn events(&self) -> &[SanitizedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Wire body: a JSON array of event records.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.events)
    }
}
