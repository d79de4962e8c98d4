//! Event lifecycle derived from the calendar.
//!
//! The status stored on an [`Event`] is a cache. [`derive_status`] is the
//! source of truth; [`StatusEngine`] rewrites the cache when the two drift
//! apart. Participation checks never read the cache.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::clock::Clock;
use crate::domain::{DateWindow, EngineEvent, Event, EventBus, EventId, EventStatus};
use crate::error::EngineError;
use crate::store::ContestStore;

/// Maps a window and a calendar date to a lifecycle state.
///
/// `today == start` and `today == end` are both ONGOING; the day after the
/// end is ENDED. A window with a missing bound has no opinion and returns
/// `stored` unchanged.
#[must_use]
pub fn derive_status(window: &DateWindow, today: NaiveDate, stored: EventStatus) -> EventStatus {
    let Some((start, end)) = window.bounds() else {
        return stored;
    };
    if today < start {
        EventStatus::Upcoming
    } else if today > end {
        EventStatus::Ended
    } else {
        EventStatus::Ongoing
    }
}

/// `true` iff `start <= today <= end`. A missing bound means closed.
#[must_use]
pub fn is_participatable(window: &DateWindow, today: NaiveDate) -> bool {
    window
        .bounds()
        .is_some_and(|(start, end)| start <= today && today <= end)
}

/// `true` once the event has ended and its announcement date is reached.
#[must_use]
pub fn is_due_for_result(event: &Event, today: NaiveDate) -> bool {
    derive_status(&event.event_window, today, event.status) == EventStatus::Ended
        && event.announcement_date.is_none_or(|date| date <= today)
}

/// Outcome of reconciling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSync {
    /// Status after reconciliation.
    pub status: EventStatus,
    /// Whether the cached value was rewritten.
    pub changed: bool,
}

/// Keeps cached event statuses in line with the calendar.
#[derive(Debug, Clone)]
pub struct StatusEngine {
    store: Arc<ContestStore>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl StatusEngine {
    /// Creates a new `StatusEngine`.
    #[must_use]
    pub fn new(store: Arc<ContestStore>, clock: Arc<dyn Clock>, event_bus: EventBus) -> Self {
        Self {
            store,
            clock,
            event_bus,
        }
    }

    /// Derives the event's status and rewrites the cache if it differs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] if the event does not exist
    /// or is soft-deleted.
    pub async fn reconcile(&self, event_id: EventId) -> Result<StatusSync, EngineError> {
        let row = self.store.event_row(event_id).await?;
        let mut event = row.write().await;
        if event.is_deleted() {
            return Err(EngineError::EventNotFound(event_id));
        }

        let stored = event.status;
        let derived = derive_status(&event.event_window, self.clock.today(), stored);
        if derived == stored {
            return Ok(StatusSync {
                status: stored,
                changed: false,
            });
        }

        let now = self.clock.now();
        event.status = derived;
        event.updated_at = now;
        drop(event);

        let _ = self.event_bus.publish(EngineEvent::EventStatusChanged {
            event_id,
            from: stored,
            to: derived,
            timestamp: now,
        });
        tracing::info!(%event_id, from = %stored, to = %derived, "event status changed");

        Ok(StatusSync {
            status: derived,
            changed: true,
        })
    }

    /// Reconciles every non-deleted event and returns how many changed.
    /// Events that disappear mid-sweep are skipped.
    pub async fn reconcile_all(&self) -> usize {
        let mut changed = 0;
        for event_id in self.store.event_ids().await {
            match self.reconcile(event_id).await {
                Ok(sync) if sync.changed => changed += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(%event_id, error = %e, "status reconciliation skipped"),
            }
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, date};

    fn window() -> DateWindow {
        DateWindow::new(date(2025, 8, 10), date(2025, 8, 20))
    }

    #[test]
    fn boundaries_partition_the_calendar() {
        let stored = EventStatus::Upcoming;
        assert_eq!(derive_status(&window(), date(2025, 8, 9), stored), EventStatus::Upcoming);
        assert_eq!(derive_status(&window(), date(2025, 8, 10), stored), EventStatus::Ongoing);
        assert_eq!(derive_status(&window(), date(2025, 8, 15), stored), EventStatus::Ongoing);
        assert_eq!(derive_status(&window(), date(2025, 8, 20), stored), EventStatus::Ongoing);
        assert_eq!(derive_status(&window(), date(2025, 8, 21), stored), EventStatus::Ended);
    }

    #[test]
    fn every_day_maps_to_exactly_one_contiguous_range() {
        let mut day = date(2025, 8, 1);
        let mut seen = Vec::new();
        while day <= date(2025, 8, 31) {
            let status = derive_status(&window(), day, EventStatus::Ended);
            if seen.last() != Some(&status) {
                seen.push(status);
            }
            let Some(next) = day.succ_opt() else {
                panic!("valid date");
            };
            day = next;
        }
        assert_eq!(
            seen,
            vec![EventStatus::Upcoming, EventStatus::Ongoing, EventStatus::Ended]
        );
    }

    #[test]
    fn missing_bound_keeps_stored_status() {
        let open_ended = DateWindow {
            start: Some(date(2025, 8, 10)),
            end: None,
        };
        assert_eq!(
            derive_status(&open_ended, date(2025, 9, 1), EventStatus::Ongoing),
            EventStatus::Ongoing
        );
        assert!(!is_participatable(&open_ended, date(2025, 8, 12)));
    }

    #[test]
    fn participatable_is_inclusive_on_both_ends() {
        assert!(!is_participatable(&window(), date(2025, 8, 9)));
        assert!(is_participatable(&window(), date(2025, 8, 10)));
        assert!(is_participatable(&window(), date(2025, 8, 15)));
        assert!(is_participatable(&window(), date(2025, 8, 20)));
        assert!(!is_participatable(&window(), date(2025, 8, 21)));
    }

    #[tokio::test]
    async fn reconcile_rewrites_stale_cache_once() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.battle_event().await;
        let mut rx = fx.event_bus.subscribe();

        fx.clock.set_today(date(2025, 8, 21));
        let Ok(first) = fx.status.reconcile(event.id).await else {
            panic!("reconcile failed");
        };
        assert_eq!(
            first,
            StatusSync {
                status: EventStatus::Ended,
                changed: true
            }
        );
        let Ok(EngineEvent::EventStatusChanged { from, to, .. }) = rx.recv().await else {
            panic!("expected status change event");
        };
        assert_eq!((from, to), (EventStatus::Ongoing, EventStatus::Ended));

        let Ok(second) = fx.status.reconcile(event.id).await else {
            panic!("reconcile failed");
        };
        assert!(!second.changed);
    }

    #[tokio::test]
    async fn reconcile_all_counts_changes() {
        let fx = Fixture::on(date(2025, 8, 15));
        fx.battle_event().await;
        fx.ranking_event().await;
        assert_eq!(fx.status.reconcile_all().await, 0);
        fx.clock.set_today(date(2025, 8, 25));
        assert_eq!(fx.status.reconcile_all().await, 2);
        assert_eq!(fx.status.reconcile_all().await, 0);
    }
}
