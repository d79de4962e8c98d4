//! Database models for the engine event journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::EngineEvent;

/// A row of the `engine_events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Auto-increment row ID. Zero until stored.
    pub id: i64,
    /// Contest event the change belongs to, if any.
    pub event_id: Option<i64>,
    /// Event type discriminator (e.g. `"result_finalized"`).
    pub event_type: String,
    /// JSONB payload with the full event.
    pub payload: serde_json::Value,
    /// When the change happened in the engine.
    pub occurred_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Builds an unsaved entry from a domain event.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if the event cannot be encoded.
    pub fn from_event(event: &EngineEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: 0,
            event_id: event.event_id().map(i64::from),
            event_type: event.event_type_str().to_string(),
            payload: serde_json::to_value(event)?,
            occurred_at: event.timestamp(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventId, ResultId};

    #[test]
    fn entry_carries_type_and_event_id() {
        let event = EngineEvent::ResultFinalized {
            event_id: EventId::new(3),
            result_id: ResultId::new(1),
            placements: 4,
            recalculated: false,
            timestamp: Utc::now(),
        };
        let Ok(entry) = JournalEntry::from_event(&event) else {
            panic!("serialization failed");
        };
        assert_eq!(entry.event_type, "result_finalized");
        assert_eq!(entry.event_id, Some(3));
        assert_eq!(
            entry.payload.get("event_type").and_then(|v| v.as_str()),
            Some("result_finalized")
        );
        assert_eq!(entry.occurred_at, event.timestamp());
    }
}
