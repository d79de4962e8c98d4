//! Import of legacy content into participants and matches.
//!
//! Events authored before participants were tracked only have content
//! posted under them. Migration rebuilds the participant rows from that
//! content and pairs battle participants. It is idempotent: a participant
//! that already exists for (event, owner) is reused, so a second run on
//! unchanged content creates nothing.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::matchmaking::Matchmaker;
use super::strategy::StrategyFactory;
use crate::clock::Clock;
use crate::collaborators::Collaborators;
use crate::domain::{EngineEvent, EventBus, EventId, SubmissionId, UserId};
use crate::error::EngineError;
use crate::store::ContestStore;

/// Counters of one migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MigrationResult {
    /// Participants created.
    pub participants_migrated: usize,
    /// Existing participants matched to their content.
    pub participants_reused: usize,
    /// Matches created.
    pub matches_migrated: usize,
    /// Records skipped because they contradict stored state.
    pub inconsistencies: usize,
}

/// Rebuilds participant and match records from legacy content.
#[derive(Debug, Clone)]
pub struct MigrationAdapter {
    store: Arc<ContestStore>,
    collaborators: Collaborators,
    matchmaker: Matchmaker,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl MigrationAdapter {
    /// Creates a new `MigrationAdapter`.
    #[must_use]
    pub fn new(
        store: Arc<ContestStore>,
        collaborators: Collaborators,
        matchmaker: Matchmaker,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            collaborators,
            matchmaker,
            clock,
            event_bus,
        }
    }

    /// Migrates the legacy content of `event_id`.
    ///
    /// The participation window and capacity do not apply to imported
    /// content. Content that contradicts stored participants is logged,
    /// counted as an inconsistency and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] for unknown events and
    /// [`EngineError::Transient`] if the content store fails.
    pub async fn migrate(&self, event_id: EventId) -> Result<MigrationResult, EngineError> {
        let event = self.store.event(event_id).await?;
        let strategy = StrategyFactory::get(event.event_type);

        let mut submissions = self.collaborators.submissions(event_id).await?;
        submissions.sort_by_key(|s| (s.submitted_at, s.id));

        let mut result = MigrationResult::default();
        let mut seen: HashMap<UserId, SubmissionId> = HashMap::new();
        for submission in &submissions {
            let owner = submission.owner();
            if let Some(first) = seen.get(&owner) {
                tracing::warn!(
                    %event_id,
                    user_id = %owner,
                    kept = %first,
                    skipped = %submission.id,
                    "second legacy submission by the same user"
                );
                result.inconsistencies += 1;
                continue;
            }
            seen.insert(owner, submission.id);

            if let Some(existing) = self.store.find_participant(event_id, owner).await {
                if existing.submission_id == submission.id {
                    result.participants_reused += 1;
                } else {
                    tracing::warn!(
                        %event_id,
                        participant_id = %existing.id,
                        stored = %existing.submission_id,
                        legacy = %submission.id,
                        "participant points at different content"
                    );
                    result.inconsistencies += 1;
                }
                continue;
            }

            let new = strategy.create_participant(&event, owner, submission);
            match self.store.insert_participant(new, None, self.clock.now()).await {
                Ok(participant) => {
                    let _ = self.event_bus.publish(EngineEvent::ParticipantJoined {
                        event_id,
                        participant_id: participant.id,
                        user_id: owner,
                        timestamp: participant.created_at,
                    });
                    result.participants_migrated += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        %event_id,
                        user_id = %owner,
                        error = %e,
                        "legacy submission skipped"
                    );
                    result.inconsistencies += 1;
                }
            }
        }

        if strategy.uses_matchmaking() {
            result.matches_migrated = self.matchmaker.run(event_id, 1).await?.len();
        }

        let _ = self.event_bus.publish(EngineEvent::MigrationCompleted {
            event_id,
            participants_migrated: result.participants_migrated,
            matches_migrated: result.matches_migrated,
            inconsistencies: result.inconsistencies,
            timestamp: self.clock.now(),
        });
        tracing::info!(
            %event_id,
            participants_migrated = result.participants_migrated,
            participants_reused = result.participants_reused,
            matches_migrated = result.matches_migrated,
            inconsistencies = result.inconsistencies,
            "migration completed"
        );
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, date, legacy_submission};

    #[tokio::test]
    async fn battle_migration_pairs_and_second_run_is_a_no_op() {
        let fx = Fixture::on(date(2025, 9, 1));
        let event = fx.battle_event().await;
        for user in 1..=5 {
            fx.content.insert(legacy_submission(user, user, event.id));
        }

        let Ok(first) = fx.service.migrate(event.id).await else {
            panic!("migration failed");
        };
        assert_eq!(first.participants_migrated, 5);
        assert_eq!(first.matches_migrated, 3);
        assert_eq!(first.inconsistencies, 0);

        let Ok(second) = fx.service.migrate(event.id).await else {
            panic!("second migration failed");
        };
        assert_eq!(
            second,
            MigrationResult {
                participants_migrated: 0,
                participants_reused: 5,
                matches_migrated: 0,
                inconsistencies: 0,
            }
        );
        assert_eq!(fx.store.matches_for_event(event.id).await.len(), 3);
    }

    #[tokio::test]
    async fn new_content_is_picked_up_on_rerun() {
        let fx = Fixture::on(date(2025, 9, 1));
        let event = fx.ranking_event().await;
        fx.content.insert(legacy_submission(1, 1, event.id));
        assert!(fx.service.migrate(event.id).await.is_ok());

        fx.content.insert(legacy_submission(2, 2, event.id));
        let Ok(rerun) = fx.service.migrate(event.id).await else {
            panic!("migration failed");
        };
        assert_eq!((rerun.participants_migrated, rerun.participants_reused), (1, 1));
        assert_eq!(rerun.matches_migrated, 0);
    }

    #[tokio::test]
    async fn conflicting_content_is_counted_and_skipped() {
        let fx = Fixture::on(date(2025, 9, 1));
        let event = fx.ranking_event().await;
        fx.content.insert(legacy_submission(1, 1, event.id));
        fx.content.insert(legacy_submission(2, 1, event.id));
        fx.content.insert(legacy_submission(3, 2, event.id));

        let Ok(result) = fx.service.migrate(event.id).await else {
            panic!("migration failed");
        };
        assert_eq!(result.participants_migrated, 2);
        assert_eq!(result.inconsistencies, 1);

        let Some(kept) = fx.store.find_participant(event.id, UserId::new(1)).await else {
            panic!("participant missing");
        };
        assert_eq!(kept.submission_id, SubmissionId::new(1));
    }
}
