//! Deterministic battle pairing.
//!
//! Participants are ordered by submission time (then id) and paired two at
//! a time. An odd participant out gets a bye: a match without an opponent
//! that completes immediately in their favor. Group ids come from the
//! store's per-event counter, never from memory, so concurrent runs cannot
//! hand out the same group twice.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::domain::{
    EngineEvent, EventBus, EventId, Match, NewMatch, PairingState, Participant, ParticipantId,
    StrategyMetadata,
};
use crate::error::EngineError;
use crate::store::ContestStore;

/// One planned pairing. `second == None` is a bye.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing {
    /// Earlier submitter.
    pub first: ParticipantId,
    /// Later submitter, if any.
    pub second: Option<ParticipantId>,
}

/// Pairs `participants` in submission order. Pure: the same input always
/// gives the same pairs. `N` participants give `N / 2` pairs plus one bye
/// when `N` is odd.
#[must_use]
pub fn plan_pairings(participants: &[Participant]) -> Vec<Pairing> {
    let mut ordered: Vec<&Participant> = participants.iter().collect();
    ordered.sort_by_key(|p| (p.submitted_at, p.id));
    ordered
        .chunks(2)
        .filter_map(|pair| match pair {
            [first, second] => Some(Pairing {
                first: first.id,
                second: Some(second.id),
            }),
            [last] => Some(Pairing {
                first: last.id,
                second: None,
            }),
            _ => None,
        })
        .collect()
}

/// Turns planned pairings into stored matches.
#[derive(Debug, Clone)]
pub struct Matchmaker {
    store: Arc<ContestStore>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    run_lock: Arc<Mutex<()>>,
}

impl Matchmaker {
    /// Creates a new `Matchmaker`.
    #[must_use]
    pub fn new(store: Arc<ContestStore>, clock: Arc<dyn Clock>, event_bus: EventBus) -> Self {
        Self {
            store,
            clock,
            event_bus,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Pairs every participant of `event_id` that no match references yet
    /// and stores the matches for `round`. Returns the new matches in group
    /// order; an empty set of unmatched participants yields none.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ParticipantNotFound`] if a participant
    /// vanishes between planning and tagging.
    pub async fn run(&self, event_id: EventId, round: u32) -> Result<Vec<Match>, EngineError> {
        let _guard = self.run_lock.lock().await;

        let matched = self.store.matched_participants(event_id).await;
        let unmatched: Vec<Participant> = self
            .store
            .participants_for_event(event_id)
            .await
            .into_iter()
            .filter(|p| !matched.contains(&p.id))
            .collect();

        let pairings = plan_pairings(&unmatched);
        if pairings.is_empty() {
            tracing::debug!(%event_id, "no unmatched participants");
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut created = Vec::with_capacity(pairings.len());
        for pairing in pairings {
            let match_group = self.store.next_match_group(event_id).await;
            let matchup = self
                .store
                .insert_match(
                    NewMatch {
                        event_id,
                        match_group,
                        round,
                        participant1: pairing.first,
                        participant2: pairing.second,
                    },
                    now,
                )
                .await;

            match pairing.second {
                Some(second) => {
                    let paired = StrategyMetadata::Battle {
                        pairing: PairingState::Paired { match_group },
                    };
                    self.store.set_participant_metadata(pairing.first, paired).await?;
                    self.store.set_participant_metadata(second, paired).await?;
                }
                None => {
                    let bye = StrategyMetadata::Battle {
                        pairing: PairingState::Bye { match_group },
                    };
                    self.store.set_participant_metadata(pairing.first, bye).await?;
                    let _ = self.event_bus.publish(EngineEvent::MatchCompleted {
                        event_id,
                        match_id: matchup.id,
                        winner: pairing.first,
                        timestamp: now,
                    });
                }
            }
            created.push(matchup);
        }

        let byes = created.iter().filter(|m| m.is_bye()).count();
        let _ = self.event_bus.publish(EngineEvent::MatchesGenerated {
            event_id,
            count: created.len(),
            byes,
            timestamp: now,
        });
        tracing::info!(%event_id, round, matches = created.len(), byes, "matches generated");

        Ok(created)
    }
}
