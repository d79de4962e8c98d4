//! Contest service: the operations callers use, built on the engine.

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::collaborators::{CollaboratorError, Collaborators};
use crate::domain::{
    CreationOutcome, CreditPayload, DateWindow, EngineEvent, Event, EventBus, EventId,
    EventStatus, EventUpdate, Match, NewEvent, Participant, ProcessOutcome, RewardCreditEvent,
    RewardEventId, RewardSubject, RewardType, SettlementSummary, Submission, UserId, VoteTarget,
};
use crate::engine::{
    FinalizedResult, Matchmaker, MigrationAdapter, MigrationResult, ParticipationContext,
    ResultCalculator, SettlementPipeline, SettlementSettings, StatusEngine, StrategyFactory,
    derive_status, is_due_for_result, is_participatable,
};
use crate::error::EngineError;
use crate::store::ContestStore;

/// Outcome of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    /// What the vote was counted for.
    pub subject: RewardSubject,
    /// Voter reward creation result, when a vote policy exists.
    #[serde(skip)]
    pub reward: Option<CreationOutcome>,
}

/// Orchestration layer for every contest operation.
///
/// Holds the shared [`ContestStore`] and one handle per engine component.
/// Mutations follow the same pattern throughout: validate, lock the row
/// or table, write, emit an [`EngineEvent`], return the new state.
#[derive(Debug, Clone)]
pub struct ContestService {
    store: Arc<ContestStore>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    status: StatusEngine,
    matchmaker: Matchmaker,
    results: ResultCalculator,
    settlement: SettlementPipeline,
    migration: MigrationAdapter,
}

impl ContestService {
    /// Creates a new `ContestService` and its engine components.
    #[must_use]
    pub fn new(
        store: Arc<ContestStore>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        settings: SettlementSettings,
    ) -> Self {
        let status = StatusEngine::new(Arc::clone(&store), Arc::clone(&clock), event_bus.clone());
        let matchmaker = Matchmaker::new(Arc::clone(&store), Arc::clone(&clock), event_bus.clone());
        let results =
            ResultCalculator::new(Arc::clone(&store), Arc::clone(&clock), event_bus.clone());
        let settlement = SettlementPipeline::new(
            Arc::clone(&store),
            collaborators.clone(),
            Arc::clone(&clock),
            event_bus.clone(),
            settings,
        );
        let migration = MigrationAdapter::new(
            Arc::clone(&store),
            collaborators.clone(),
            matchmaker.clone(),
            Arc::clone(&clock),
            event_bus.clone(),
        );
        Self {
            store,
            collaborators,
            clock,
            event_bus,
            status,
            matchmaker,
            results,
            settlement,
            migration,
        }
    }

    /// Returns a reference to the inner [`EventBus`].
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Returns a reference to the inner [`ContestStore`].
    #[must_use]
    pub fn store(&self) -> &Arc<ContestStore> {
        &self.store
    }

    /// Returns the status engine.
    #[must_use]
    pub fn status_engine(&self) -> &StatusEngine {
        &self.status
    }

    /// Returns the result calculator.
    #[must_use]
    pub fn result_calculator(&self) -> &ResultCalculator {
        &self.results
    }

    /// Returns the settlement pipeline.
    #[must_use]
    pub fn settlement(&self) -> &SettlementPipeline {
        &self.settlement
    }

    // ----- events -------------------------------------------------------

    /// Authors a new event. Every rule is checked before anything is
    /// stored.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for invalid dates, capacity or
    /// reward conditions.
    pub async fn create_event(&self, request: NewEvent) -> Result<Event, EngineError> {
        request.validate()?;
        let now = self.clock.now();
        let initial = derive_status(
            &DateWindow::new(request.event_start, request.event_end),
            self.clock.today(),
            EventStatus::Upcoming,
        );
        let event = self.store.insert_event(request, initial, now).await;

        let _ = self.event_bus.publish(EngineEvent::EventCreated {
            event_id: event.id,
            event_kind: event.event_type,
            timestamp: now,
        });
        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            status = %event.status,
            "event created"
        );
        Ok(event)
    }

    /// Applies a partial update. The merged event is validated with the
    /// authoring rules; the type cannot change.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] for unknown events,
    /// [`EngineError::Validation`] if the merged event is invalid, and
    /// [`EngineError::Conflict`] if the event already has a result or the
    /// new capacity is below the current participant count.
    pub async fn update_event(
        &self,
        event_id: EventId,
        update: EventUpdate,
    ) -> Result<Event, EngineError> {
        if self.store.result_for_event(event_id).await.is_some() {
            return Err(EngineError::Conflict(format!(
                "{event_id} has a result and can no longer change"
            )));
        }
        let participants = self.store.participant_count(event_id).await;

        let row = self.store.event_row(event_id).await?;
        let mut event = row.write().await;
        if event.is_deleted() {
            return Err(EngineError::EventNotFound(event_id));
        }
        let merged = update.merge_into(NewEvent::from_event(&event)?);
        merged.validate()?;
        if usize::try_from(merged.max_participants).unwrap_or(usize::MAX) < participants {
            return Err(EngineError::Conflict(format!(
                "{event_id} already has {participants} participants"
            )));
        }

        let now = self.clock.now();
        event.title = merged.title;
        event.purchase_window = DateWindow::new(merged.purchase_start, merged.purchase_end);
        event.event_window = DateWindow::new(merged.event_start, merged.event_end);
        event.announcement_date = Some(merged.announcement_date);
        event.max_participants = merged.max_participants;
        event.reward_table = merged.reward_table;
        event.status = derive_status(&event.event_window, self.clock.today(), event.status);
        event.updated_at = now;
        let updated = event.clone();
        drop(event);

        tracing::info!(%event_id, status = %updated.status, "event updated");
        Ok(updated)
    }

    /// Soft-deletes an event. It disappears from every query and sweep.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] if the event does not exist
    /// or is already deleted.
    pub async fn delete_event(&self, event_id: EventId) -> Result<(), EngineError> {
        let row = self.store.event_row(event_id).await?;
        let mut event = row.write().await;
        if event.is_deleted() {
            return Err(EngineError::EventNotFound(event_id));
        }
        let now = self.clock.now();
        event.deleted_at = Some(now);
        event.updated_at = now;
        drop(event);

        let _ = self.event_bus.publish(EngineEvent::EventDeleted {
            event_id,
            timestamp: now,
        });
        tracing::info!(%event_id, "event deleted");
        Ok(())
    }

    /// Returns an event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] if the event does not exist
    /// or is soft-deleted.
    pub async fn get_event(&self, event_id: EventId) -> Result<Event, EngineError> {
        self.store.event(event_id).await
    }

    /// Lists every non-deleted event in id order.
    pub async fn list_events(&self) -> Vec<Event> {
        self.store.events().await
    }

    // ----- status -------------------------------------------------------

    /// Derives the event's status and stores it if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] if the event does not exist
    /// or is soft-deleted.
    pub async fn derive_and_sync_status(
        &self,
        event_id: EventId,
    ) -> Result<EventStatus, EngineError> {
        Ok(self.status.reconcile(event_id).await?.status)
    }

    /// Reconciles every event and returns how many changed.
    pub async fn sync_all_statuses(&self) -> usize {
        self.status.reconcile_all().await
    }

    // ----- participation and voting -------------------------------------

    /// Enters `user_id` into `event_id` with `submission`.
    ///
    /// A participation reward is queued when a policy for it exists;
    /// failing to queue it does not fail the participation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] or
    /// [`EngineError::UserNotFound`] for unknown records,
    /// [`EngineError::Validation`] when the window is closed or the
    /// submission is unfit, and [`EngineError::Conflict`] if the user
    /// already participates or the event is full.
    pub async fn participate(
        &self,
        event_id: EventId,
        user_id: UserId,
        submission: Submission,
    ) -> Result<Participant, EngineError> {
        let event = self.store.event(event_id).await?;
        let strategy = StrategyFactory::get(event.event_type);
        self.ensure_user(user_id).await?;

        let today = self.clock.today();
        if !is_participatable(&event.event_window, today) {
            return Err(EngineError::Validation(format!(
                "{event_id} is not open for participation on {today}"
            )));
        }
        let ctx = ParticipationContext {
            today,
            current_participants: self.store.participant_count(event_id).await,
        };
        if !strategy.can_participate(&event, &ctx) {
            return Err(EngineError::Conflict(format!("{event_id} is full")));
        }
        strategy.validate_participation(&event, user_id, &submission)?;

        let new = strategy.create_participant(&event, user_id, &submission);
        let participant = self
            .store
            .insert_participant(new, Some(event.max_participants), self.clock.now())
            .await?;

        let _ = self.event_bus.publish(EngineEvent::ParticipantJoined {
            event_id,
            participant_id: participant.id,
            user_id,
            timestamp: participant.created_at,
        });
        tracing::info!(%event_id, participant_id = %participant.id, %user_id, "participant joined");

        self.queue_action_reward(
            user_id,
            RewardSubject::Event(event_id),
            RewardType::EventParticipation,
            format!("joined {event_id}"),
        )
        .await;
        Ok(participant)
    }

    /// Records one vote while the event window is open.
    ///
    /// Battle votes target a match and may not be cast by its players.
    /// Ranking votes target a participant other than the voter. A voter
    /// reward is queued when a policy exists.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for closed windows, wrong
    /// target kinds or self-votes, [`EngineError::Conflict`] for repeated
    /// votes or decided matches, and not-found errors for unknown records.
    pub async fn vote(
        &self,
        event_id: EventId,
        voter: UserId,
        target: VoteTarget,
    ) -> Result<VoteReceipt, EngineError> {
        let event = self.store.event(event_id).await?;
        let strategy = StrategyFactory::get(event.event_type);
        strategy.validate_vote(&target)?;
        self.ensure_user(voter).await?;
        if !is_participatable(&event.event_window, self.clock.today()) {
            return Err(EngineError::Validation(format!("voting on {event_id} is closed")));
        }

        let (subject, reward_type) = match target {
            VoteTarget::Match { match_id, choice } => {
                let matchup = self.store.matchup(match_id).await?;
                if let Some(own) = self.store.find_participant(event_id, voter).await {
                    if matchup.involves(own.id) {
                        return Err(EngineError::Validation(format!(
                            "{voter} plays in {match_id} and cannot vote in it"
                        )));
                    }
                }
                self.store
                    .record_match_vote(event_id, match_id, voter, choice)
                    .await?;
                (RewardSubject::Match(match_id), RewardType::BattleVote)
            }
            VoteTarget::Participant { participant_id } => {
                self.store
                    .record_ranking_vote(event_id, participant_id, voter)
                    .await?;
                (RewardSubject::Participant(participant_id), RewardType::RankingVote)
            }
        };
        tracing::debug!(%event_id, %voter, %subject, "vote recorded");

        let reward = self
            .queue_action_reward(voter, subject, reward_type, format!("voted on {subject}"))
            .await;
        Ok(VoteReceipt { subject, reward })
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<(), EngineError> {
        self.collaborators
            .user(user_id)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                CollaboratorError::NotFound(_) => EngineError::UserNotFound(user_id),
                other => EngineError::Transient(other),
            })
    }

    /// Queues a reward for a user action. Missing policies and failures are
    /// logged; the action itself already succeeded.
    async fn queue_action_reward(
        &self,
        user_id: UserId,
        subject: RewardSubject,
        reward_type: RewardType,
        reason: String,
    ) -> Option<CreationOutcome> {
        let payload = CreditPayload {
            reason,
            ..CreditPayload::default()
        };
        match self
            .settlement
            .create_credit_event(user_id, subject, reward_type, &payload)
            .await
        {
            Ok(outcome) => Some(outcome),
            Err(EngineError::PolicyNotFound(_)) => {
                tracing::debug!(%user_id, %reward_type, "no policy, action not rewarded");
                None
            }
            Err(e) => {
                tracing::warn!(%user_id, %reward_type, error = %e, "action reward not queued");
                None
            }
        }
    }

    // ----- matches and results ------------------------------------------

    /// Pairs every unmatched participant of a battle event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] for unknown events and
    /// [`EngineError::Validation`] for events that do not use matches.
    pub async fn generate_matches(&self, event_id: EventId) -> Result<Vec<Match>, EngineError> {
        let event = self.store.event(event_id).await?;
        if !StrategyFactory::get(event.event_type).uses_matchmaking() {
            return Err(EngineError::Validation(format!(
                "{event_id} is a {} event and has no matches",
                event.event_type
            )));
        }
        self.matchmaker.run(event_id, 1).await
    }

    /// Finalizes the result of an event.
    ///
    /// # Errors
    ///
    /// See [`ResultCalculator::finalize`].
    pub async fn finalize_result(
        &self,
        event_id: EventId,
        force: bool,
    ) -> Result<FinalizedResult, EngineError> {
        self.results.finalize(event_id, force).await
    }

    /// Finalizes every event whose window has closed and whose
    /// announcement date has come, then queues its rewards. Returns the
    /// number of events finalized; per-event failures are logged.
    pub async fn finalize_due_events(&self) -> usize {
        let today = self.clock.today();
        let mut finalized = 0;
        for event in self.store.events().await {
            if !is_due_for_result(&event, today)
                || self.store.result_for_event(event.id).await.is_some()
            {
                continue;
            }
            match self.results.finalize(event.id, false).await {
                Ok(_) => finalized += 1,
                Err(EngineError::Conflict(reason)) => {
                    tracing::debug!(event_id = %event.id, %reason, "finalization skipped");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "finalization failed");
                    continue;
                }
            }
            if let Err(e) = self.settlement.enqueue_result_rewards(event.id).await {
                tracing::warn!(event_id = %event.id, error = %e, "result rewards not queued");
            }
        }
        finalized
    }

    // ----- rewards ------------------------------------------------------

    /// Queues and processes the rewards of an event's result.
    ///
    /// # Errors
    ///
    /// See [`SettlementPipeline::settle_event`].
    pub async fn settle_rewards(
        &self,
        event_id: EventId,
    ) -> Result<SettlementSummary, EngineError> {
        self.settlement.settle_event(event_id).await
    }

    /// Processes one PENDING reward row on operator request.
    ///
    /// # Errors
    ///
    /// See [`SettlementPipeline::reprocess`].
    pub async fn reprocess(
        &self,
        reward_event_id: RewardEventId,
    ) -> Result<ProcessOutcome, EngineError> {
        self.settlement.reprocess(reward_event_id).await
    }

    /// Terminally failed reward rows awaiting an operator.
    pub async fn operator_queue(&self) -> Vec<RewardCreditEvent> {
        self.settlement.operator_queue().await
    }

    // ----- migration ----------------------------------------------------

    /// Imports the legacy content of an event.
    ///
    /// # Errors
    ///
    /// See [`MigrationAdapter::migrate`].
    pub async fn migrate(&self, event_id: EventId) -> Result<MigrationResult, EngineError> {
        self.migration.migrate(event_id).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{DateWindow, EventType, RewardStatus};
    use crate::test_support::{Fixture, battle_request, date, submission};

    #[tokio::test]
    async fn create_event_emits_event_and_derives_status() {
        let fx = Fixture::on(date(2025, 8, 15));
        let mut rx = fx.service.event_bus().subscribe();
        let Ok(event) = fx.service.create_event(battle_request()).await else {
            panic!("create failed");
        };
        assert_eq!(event.status, EventStatus::Ongoing);
        let Ok(published) = rx.recv().await else {
            panic!("expected event");
        };
        assert_eq!(published.event_type_str(), "event_created");
    }

    #[tokio::test]
    async fn invalid_dates_store_nothing() {
        let fx = Fixture::on(date(2025, 8, 15));
        let mut request = battle_request();
        request.announcement_date = date(2025, 8, 1);
        let created = fx.service.create_event(request).await;
        assert!(matches!(created, Err(EngineError::Validation(_))));
        assert!(fx.service.list_events().await.is_empty());
    }

    #[tokio::test]
    async fn update_revalidates_and_rederives_status() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.battle_event().await;

        let bad = EventUpdate {
            event_window: Some((date(2025, 8, 20), date(2025, 8, 10))),
            ..EventUpdate::default()
        };
        assert!(matches!(
            fx.service.update_event(event.id, bad).await,
            Err(EngineError::Validation(_))
        ));

        let later = EventUpdate {
            purchase_window: Some((date(2025, 8, 16), date(2025, 8, 18))),
            event_window: Some((date(2025, 8, 16), date(2025, 8, 20))),
            ..EventUpdate::default()
        };
        let Ok(updated) = fx.service.update_event(event.id, later).await else {
            panic!("update failed");
        };
        assert_eq!(updated.status, EventStatus::Upcoming);
        assert_eq!(
            updated.event_window,
            DateWindow::new(date(2025, 8, 16), date(2025, 8, 20))
        );
    }

    #[tokio::test]
    async fn deleted_event_is_invisible() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.battle_event().await;
        assert!(fx.service.delete_event(event.id).await.is_ok());
        assert!(matches!(
            fx.service.get_event(event.id).await,
            Err(EngineError::EventNotFound(_))
        ));
        assert!(fx.service.list_events().await.is_empty());
        assert_eq!(fx.service.sync_all_statuses().await, 0);
        assert!(matches!(
            fx.service.delete_event(event.id).await,
            Err(EngineError::EventNotFound(_))
        ));
    }

    #[tokio::test]
    async fn participation_is_refused_outside_the_window() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.ranking_event().await;
        fx.users.insert(fx.user(1));
        fx.clock.set_today(date(2025, 8, 21));
        let late = fx
            .service
            .participate(event.id, UserId::new(1), submission(1, UserId::new(1), 0))
            .await;
        assert!(matches!(late, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_user_cannot_participate() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.ranking_event().await;
        let outcome = fx
            .service
            .participate(event.id, UserId::new(77), submission(1, UserId::new(77), 0))
            .await;
        assert!(matches!(outcome, Err(EngineError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn participation_queues_a_reward_once_a_day() {
        let fx = Fixture::on(date(2025, 8, 15));
        let first = fx.ranking_event().await;
        let second = fx.battle_event().await;
        fx.join(first.id, 1).await;
        fx.join(second.id, 1).await;

        let rows = fx
            .store
            .reward_events_where(|r| r.reward_type == RewardType::EventParticipation)
            .await;
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|r| r.status == RewardStatus::Pending));
    }

    #[tokio::test]
    async fn battle_players_cannot_vote_in_their_own_match() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.battle_event().await;
        let a = fx.join(event.id, 1).await;
        fx.join(event.id, 2).await;
        let Ok(matches) = fx.service.generate_matches(event.id).await else {
            panic!("matchmaking failed");
        };
        let Some(matchup) = matches.first() else {
            panic!("missing match");
        };
        let own = fx
            .service
            .vote(
                event.id,
                UserId::new(1),
                VoteTarget::Match {
                    match_id: matchup.id,
                    choice: a.id,
                },
            )
            .await;
        assert!(matches!(own, Err(EngineError::Validation(_))));

        fx.users.insert(fx.user(3));
        let target = VoteTarget::Match {
            match_id: matchup.id,
            choice: a.id,
        };
        let Ok(receipt) = fx.service.vote(event.id, UserId::new(3), target).await else {
            panic!("vote failed");
        };
        assert_eq!(receipt.subject, RewardSubject::Match(matchup.id));
        assert!(matches!(receipt.reward, Some(CreationOutcome::Created(_))));
        let repeat = fx.service.vote(event.id, UserId::new(3), target).await;
        assert!(matches!(repeat, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn ranking_votes_count_towards_the_result() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.ranking_event().await;
        let early = fx.join(event.id, 1).await;
        let late = fx.join(event.id, 2).await;
        fx.users.insert(fx.user(3));
        let vote = fx
            .service
            .vote(
                event.id,
                UserId::new(3),
                VoteTarget::Participant {
                    participant_id: late.id,
                },
            )
            .await;
        assert!(vote.is_ok());

        fx.clock.set_today(date(2025, 8, 25));
        let Ok(finalized) = fx.service.finalize_result(event.id, false).await else {
            panic!("finalize failed");
        };
        let order: Vec<_> = finalized.details.iter().map(|d| d.participant_id).collect();
        assert_eq!(order, vec![late.id, early.id]);
    }

    #[tokio::test]
    async fn ranking_event_has_no_matches() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.ranking_event().await;
        assert!(matches!(
            fx.service.generate_matches(event.id).await,
            Err(EngineError::Validation(_))
        ));
        assert_eq!(event.event_type, EventType::Ranking);
    }

    #[tokio::test]
    async fn due_events_are_finalized_once_and_rewards_queued() {
        let fx = Fixture::on(date(2025, 8, 15));
        let event = fx.ranking_event().await;
        fx.join(event.id, 1).await;

        fx.clock.set_today(date(2025, 8, 21));
        assert_eq!(fx.service.finalize_due_events().await, 0);

        fx.clock.set_today(date(2025, 8, 22));
        assert_eq!(fx.service.finalize_due_events().await, 1);
        assert_eq!(fx.service.finalize_due_events().await, 0);

        let queued = fx
            .store
            .reward_events_where(|r| r.reward_type == RewardType::EventReward)
            .await;
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn result_blocks_further_updates() {
        let fx = Fixture::on(date(2025, 8, 25));
        let event = fx.ranking_event().await;
        assert!(fx.service.finalize_result(event.id, false).await.is_ok());
        let update = EventUpdate {
            title: Some("renamed".to_string()),
            ..EventUpdate::default()
        };
        assert!(matches!(
            fx.service.update_event(event.id, update).await,
            Err(EngineError::Conflict(_))
        ));
    }
}
