//! Arena-style record store with per-row locking.
//!
//! [`ContestStore`] owns every engine record. Records reference each other
//! only through typed ids. Event rows and reward credit rows sit behind
//! their own [`tokio::sync::RwLock`] inside a map that is itself locked, so
//! status reconciliation and reward state transitions lock one row, never
//! the whole table. Participants,
//! matches and results use a table-level lock because their writes are
//! check-and-insert operations (uniqueness, capacity, single result per
//! event).
//!
//! # Concurrency
//!
//! - Transitions of one reward row are serialized by its row lock.
//! - The per-event match-group counter is an atomic increment-and-return.
//! - The credit-key reservation map backs the processing-time duplicate
//!   check: a key can be reserved by one row at a time, and stays reserved
//!   once that row is PROCESSED.

mod results;
mod rewards;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

pub use results::{NewResult, NewResultDetail};
pub use rewards::{ClaimMode, NewCreditEvent};

use crate::domain::{
    CreditKey, DateWindow, Event, EventId, EventStatus, Match, MatchId, NewEvent, NewMatch,
    NewParticipant, Participant, ParticipantId, RewardEventId, StrategyMetadata, UserId,
};
use crate::error::EngineError;

#[derive(Debug, Default)]
struct Sequences {
    event: AtomicI64,
    participant: AtomicI64,
    matchup: AtomicI64,
    result: AtomicI64,
    detail: AtomicI64,
    reward: AtomicI64,
}

fn next_id(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, Default)]
struct ParticipantTable {
    rows: BTreeMap<ParticipantId, Participant>,
    by_event_user: HashMap<(EventId, UserId), ParticipantId>,
    ranking_votes: HashSet<(ParticipantId, UserId)>,
}

/// Central store for all engine records.
#[derive(Debug, Default)]
pub struct ContestStore {
    sequences: Sequences,
    events: RwLock<BTreeMap<EventId, Arc<RwLock<Event>>>>,
    participants: RwLock<ParticipantTable>,
    matches: RwLock<BTreeMap<MatchId, Match>>,
    match_groups: Mutex<HashMap<EventId, u32>>,
    results: RwLock<results::ResultTable>,
    credits: RwLock<rewards::CreditRows>,
    credit_keys: Mutex<HashMap<CreditKey, RewardEventId>>,
}

impl ContestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ----- events -------------------------------------------------------

    /// Persists a validated event with its initial status.
    pub async fn insert_event(
        &self,
        request: NewEvent,
        status: EventStatus,
        now: DateTime<Utc>,
    ) -> Event {
        let id = EventId::new(next_id(&self.sequences.event));
        let event = Event {
            id,
            title: request.title,
            event_type: request.event_type,
            purchase_window: DateWindow::new(request.purchase_start, request.purchase_end),
            event_window: DateWindow::new(request.event_start, request.event_end),
            announcement_date: Some(request.announcement_date),
            max_participants: request.max_participants,
            status,
            reward_table: request.reward_table,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.events
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(event.clone())));
        event
    }

    /// Stores an event record as-is, assigning it a fresh id. Used for
    /// records whose windows may be incomplete (legacy imports).
    pub async fn insert_event_record(&self, mut event: Event) -> Event {
        event.id = EventId::new(next_id(&self.sequences.event));
        self.events
            .write()
            .await
            .insert(event.id, Arc::new(RwLock::new(event.clone())));
        event
    }

    /// Returns the row lock of a non-deleted event.
    ///
    /// Callers must re-check [`Event::is_deleted`] after locking when the
    /// row may have been deleted concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] if the event does not exist
    /// or is soft-deleted.
    pub async fn event_row(&self, event_id: EventId) -> Result<Arc<RwLock<Event>>, EngineError> {
        let row = self
            .events
            .read()
            .await
            .get(&event_id)
            .cloned()
            .ok_or(EngineError::EventNotFound(event_id))?;
        if row.read().await.is_deleted() {
            return Err(EngineError::EventNotFound(event_id));
        }
        Ok(row)
    }

    /// Returns a snapshot of a non-deleted event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] if the event does not exist
    /// or is soft-deleted.
    pub async fn event(&self, event_id: EventId) -> Result<Event, EngineError> {
        let row = self.event_row(event_id).await?;
        let event = row.read().await.clone();
        Ok(event)
    }

    /// Returns the ids of all non-deleted events in id order.
    pub async fn event_ids(&self) -> Vec<EventId> {
        let rows: Vec<(EventId, Arc<RwLock<Event>>)> = self
            .events
            .read()
            .await
            .iter()
            .map(|(id, row)| (*id, Arc::clone(row)))
            .collect();
        let mut ids = Vec::with_capacity(rows.len());
        for (id, row) in rows {
            if !row.read().await.is_deleted() {
                ids.push(id);
            }
        }
        ids
    }

    /// Returns snapshots of all non-deleted events in id order.
    pub async fn events(&self) -> Vec<Event> {
        let rows: Vec<Arc<RwLock<Event>>> =
            self.events.read().await.values().map(Arc::clone).collect();
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let event = row.read().await;
            if !event.is_deleted() {
                events.push(event.clone());
            }
        }
        events
    }

    // ----- participants -------------------------------------------------

    /// Inserts a participant, enforcing (event, user) uniqueness and the
    /// event's capacity in one step.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conflict`] if the user already participates
    /// or the event is full.
    pub async fn insert_participant(
        &self,
        new: NewParticipant,
        capacity: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Participant, EngineError> {
        let mut table = self.participants.write().await;
        if let Some(existing) = table.by_event_user.get(&(new.event_id, new.user_id)) {
            return Err(EngineError::Conflict(format!(
                "{} already participates in {} as {existing}",
                new.user_id, new.event_id
            )));
        }
        if let Some(capacity) = capacity {
            let current = table
                .rows
                .values()
                .filter(|p| p.event_id == new.event_id)
                .count();
            if current >= usize::try_from(capacity).unwrap_or(usize::MAX) {
                return Err(EngineError::Conflict(format!(
                    "{} is full ({capacity} participants)",
                    new.event_id
                )));
            }
        }
        let participant = Participant {
            id: ParticipantId::new(next_id(&self.sequences.participant)),
            event_id: new.event_id,
            user_id: new.user_id,
            submission_id: new.submission_id,
            submitted_at: new.submitted_at,
            metadata: new.metadata,
            created_at: now,
        };
        table
            .by_event_user
            .insert((participant.event_id, participant.user_id), participant.id);
        table.rows.insert(participant.id, participant.clone());
        Ok(participant)
    }

    /// Returns the participant of `user_id` in `event_id`, if any.
    pub async fn find_participant(
        &self,
        event_id: EventId,
        user_id: UserId,
    ) -> Option<Participant> {
        let table = self.participants.read().await;
        table
            .by_event_user
            .get(&(event_id, user_id))
            .and_then(|id| table.rows.get(id))
            .cloned()
    }

    /// Returns a participant snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ParticipantNotFound`] if absent.
    pub async fn participant(&self, id: ParticipantId) -> Result<Participant, EngineError> {
        self.participants
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(EngineError::ParticipantNotFound(id))
    }

    /// Returns the participants of an event ordered by submission time,
    /// then id.
    pub async fn participants_for_event(&self, event_id: EventId) -> Vec<Participant> {
        let mut participants: Vec<Participant> = self
            .participants
            .read()
            .await
            .rows
            .values()
            .filter(|p| p.event_id == event_id)
            .cloned()
            .collect();
        participants.sort_by_key(|p| (p.submitted_at, p.id));
        participants
    }

    /// Number of participants of an event.
    pub async fn participant_count(&self, event_id: EventId) -> usize {
        self.participants
            .read()
            .await
            .rows
            .values()
            .filter(|p| p.event_id == event_id)
            .count()
    }

    /// Replaces a participant's strategy metadata.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ParticipantNotFound`] if absent.
    pub async fn set_participant_metadata(
        &self,
        id: ParticipantId,
        metadata: StrategyMetadata,
    ) -> Result<(), EngineError> {
        let mut table = self.participants.write().await;
        let participant = table
            .rows
            .get_mut(&id)
            .ok_or(EngineError::ParticipantNotFound(id))?;
        participant.metadata = metadata;
        Ok(())
    }

    /// Counts one ranking vote from `voter` for `participant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ParticipantNotFound`] if absent,
    /// [`EngineError::Validation`] if the participant is not a ranking
    /// entry of `event_id`, and [`EngineError::Conflict`] if `voter`
    /// already voted for it.
    pub async fn record_ranking_vote(
        &self,
        event_id: EventId,
        participant_id: ParticipantId,
        voter: UserId,
    ) -> Result<Participant, EngineError> {
        let mut table = self.participants.write().await;
        let Some(participant) = table.rows.get(&participant_id) else {
            return Err(EngineError::ParticipantNotFound(participant_id));
        };
        if participant.event_id != event_id {
            return Err(EngineError::Validation(format!(
                "{participant_id} does not belong to {event_id}"
            )));
        }
        if !matches!(participant.metadata, StrategyMetadata::Ranking { .. }) {
            return Err(EngineError::Validation(format!(
                "{participant_id} is not a ranking entry"
            )));
        }
        if participant.user_id == voter {
            return Err(EngineError::Validation(format!(
                "{voter} cannot vote for their own entry"
            )));
        }
        if !table.ranking_votes.insert((participant_id, voter)) {
            return Err(EngineError::Conflict(format!(
                "{voter} already voted for {participant_id}"
            )));
        }
        let participant = table
            .rows
            .get_mut(&participant_id)
            .ok_or(EngineError::ParticipantNotFound(participant_id))?;
        if let StrategyMetadata::Ranking { vote_count } = &mut participant.metadata {
            *vote_count = vote_count.saturating_add(1);
        }
        Ok(participant.clone())
    }

    // ----- matches ------------------------------------------------------

    /// Atomically increments and returns the event's match-group counter.
    /// The first call for an event returns 1.
    pub async fn next_match_group(&self, event_id: EventId) -> u32 {
        let mut groups = self.match_groups.lock().await;
        let counter = groups.entry(event_id).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    /// Inserts a match. A bye is completed immediately: participant 1
    /// advances without a vote.
    pub async fn insert_match(&self, new: NewMatch, now: DateTime<Utc>) -> Match {
        let mut matchup = Match {
            id: MatchId::new(next_id(&self.sequences.matchup)),
            event_id: new.event_id,
            match_group: new.match_group,
            round: new.round,
            participant1: new.participant1,
            participant2: new.participant2,
            votes1: 0,
            votes2: 0,
            voters: BTreeSet::new(),
            winner: None,
            created_at: now,
            completed_at: None,
        };
        if matchup.is_bye() {
            matchup.complete(now);
        }
        self.matches.write().await.insert(matchup.id, matchup.clone());
        matchup
    }

    /// Returns a match snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MatchNotFound`] if absent.
    pub async fn matchup(&self, id: MatchId) -> Result<Match, EngineError> {
        self.matches
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::MatchNotFound(id))
    }

    /// Returns the matches of an event ordered by match group.
    pub async fn matches_for_event(&self, event_id: EventId) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .matches
            .read()
            .await
            .values()
            .filter(|m| m.event_id == event_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| (m.round, m.match_group, m.id));
        matches
    }

    /// Ids of participants already referenced by a match of the event.
    pub async fn matched_participants(&self, event_id: EventId) -> HashSet<ParticipantId> {
        self.matches
            .read()
            .await
            .values()
            .filter(|m| m.event_id == event_id)
            .flat_map(|m| std::iter::once(m.participant1).chain(m.participant2))
            .collect()
    }

    /// Records a battle vote.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MatchNotFound`] if the match is absent or
    /// belongs to another event, plus the errors of [`Match::record_vote`].
    pub async fn record_match_vote(
        &self,
        event_id: EventId,
        match_id: MatchId,
        voter: UserId,
        choice: ParticipantId,
    ) -> Result<Match, EngineError> {
        let mut matches = self.matches.write().await;
        let matchup = matches
            .get_mut(&match_id)
            .filter(|m| m.event_id == event_id)
            .ok_or(EngineError::MatchNotFound(match_id))?;
        matchup.record_vote(voter, choice)?;
        Ok(matchup.clone())
    }

    /// Completes every open match of an event and returns the ones that
    /// were completed by this call.
    pub async fn complete_open_matches(&self, event_id: EventId, now: DateTime<Utc>) -> Vec<Match> {
        let mut matches = self.matches.write().await;
        let mut completed = Vec::new();
        for matchup in matches
            .values_mut()
            .filter(|m| m.event_id == event_id && !m.is_complete())
        {
            matchup.complete(now);
            completed.push(matchup.clone());
        }
        completed.sort_by_key(|m| m.match_group);
        completed
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{PairingState, SubmissionId};

    fn new_participant(event: i64, user: i64) -> NewParticipant {
        NewParticipant {
            event_id: EventId::new(event),
            user_id: UserId::new(user),
            submission_id: SubmissionId::new(user * 10),
            submitted_at: Utc::now(),
            metadata: StrategyMetadata::Ranking { vote_count: 0 },
        }
    }

    #[tokio::test]
    async fn participant_is_unique_per_event_and_user() {
        let store = ContestStore::new();
        let first = store.insert_participant(new_participant(1, 7), None, Utc::now()).await;
        assert!(first.is_ok());
        let again = store.insert_participant(new_participant(1, 7), None, Utc::now()).await;
        assert!(matches!(again, Err(EngineError::Conflict(_))));
        let other_event = store.insert_participant(new_participant(2, 7), None, Utc::now()).await;
        assert!(other_event.is_ok());
    }

    #[tokio::test]
    async fn capacity_is_enforced_on_insert() {
        let store = ContestStore::new();
        assert!(store.insert_participant(new_participant(1, 1), Some(1), Utc::now()).await.is_ok());
        let full = store.insert_participant(new_participant(1, 2), Some(1), Utc::now()).await;
        assert!(matches!(full, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn match_group_counter_starts_at_one_per_event() {
        let store = ContestStore::new();
        assert_eq!(store.next_match_group(EventId::new(1)).await, 1);
        assert_eq!(store.next_match_group(EventId::new(1)).await, 2);
        assert_eq!(store.next_match_group(EventId::new(2)).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn match_group_counter_is_atomic_under_contention() {
        let store = Arc::new(ContestStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.next_match_group(EventId::new(9)).await
            }));
        }
        let mut groups = Vec::new();
        for handle in handles {
            let Ok(group) = handle.await else {
                panic!("task failed");
            };
            groups.push(group);
        }
        groups.sort_unstable();
        let expected: Vec<u32> = (1..=50).collect();
        assert_eq!(groups, expected);
    }

    #[tokio::test]
    async fn bye_match_is_completed_on_insert() {
        let store = ContestStore::new();
        let bye = store
            .insert_match(
                NewMatch {
                    event_id: EventId::new(1),
                    match_group: 1,
                    round: 1,
                    participant1: ParticipantId::new(5),
                    participant2: None,
                },
                Utc::now(),
            )
            .await;
        assert_eq!(bye.winner, Some(ParticipantId::new(5)));
        assert!(store.complete_open_matches(EventId::new(1), Utc::now()).await.is_empty());
    }

    #[tokio::test]
    async fn ranking_vote_counts_once_per_voter() {
        let store = ContestStore::new();
        let Ok(p) = store.insert_participant(new_participant(1, 1), None, Utc::now()).await else {
            panic!("insert failed");
        };
        let first = store.record_ranking_vote(EventId::new(1), p.id, UserId::new(2)).await;
        assert!(matches!(
            first.map(|p| p.metadata.vote_count()),
            Ok(1)
        ));
        let again = store.record_ranking_vote(EventId::new(1), p.id, UserId::new(2)).await;
        assert!(matches!(again, Err(EngineError::Conflict(_))));
        let own = store.record_ranking_vote(EventId::new(1), p.id, UserId::new(1)).await;
        assert!(matches!(own, Err(EngineError::Validation(_))));
    }

    #[tokio::test]
    async fn metadata_update_is_visible() {
        let store = ContestStore::new();
        let Ok(p) = store.insert_participant(new_participant(1, 1), None, Utc::now()).await else {
            panic!("insert failed");
        };
        let battle = StrategyMetadata::Battle {
            pairing: PairingState::Paired { match_group: 3 },
        };
        assert!(store.set_participant_metadata(p.id, battle).await.is_ok());
        let Ok(reloaded) = store.participant(p.id).await else {
            panic!("participant missing");
        };
        assert_eq!(reloaded.metadata, battle);
    }
}
