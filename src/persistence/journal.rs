//! Journal writer: drains the [`EventBus`] into a durable sink.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::models::JournalEntry;
use crate::domain::EventBus;
use crate::error::EngineError;

/// Durable destination for journal entries.
pub trait JournalSink: Send + Sync + 'static {
    /// Stores one entry and returns its row id.
    fn append(
        &self,
        entry: JournalEntry,
    ) -> impl Future<Output = Result<i64, EngineError>> + Send;

    /// Removes entries recorded before `cutoff` and returns how many went.
    fn prune(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send;
}

/// Subscribes to `event_bus` and appends every event to `sink` until the
/// bus closes.
///
/// Write failures are logged and the event is dropped; a lagging writer
/// logs how many events it missed and keeps going.
pub fn spawn_writer<S: JournalSink>(sink: Arc<S>, event_bus: &EventBus) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let entry = match JournalEntry::from_event(&event) {
                        Ok(entry) => entry,
                        Err(e) => {
                            tracing::warn!(
                                event_type = event.event_type_str(),
                                error = %e,
                                "event not journaled"
                            );
                            continue;
                        }
                    };
                    if let Err(e) = sink.append(entry).await {
                        tracing::warn!(
                            event_type = event.event_type_str(),
                            error = %e,
                            "journal write failed"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "journal writer lagged behind event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("journal writer stopped");
    })
}
