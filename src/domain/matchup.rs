//! Battle matches.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{EventId, MatchId, ParticipantId, UserId};
use crate::error::EngineError;

/// A single pairing within a battle event.
///
/// Open while `winner` is `None`; complete once a winner is recorded.
/// A match without `participant2` is a bye: participant 1 advances without
/// a vote.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    /// Match identifier.
    pub id: MatchId,
    /// Owning event.
    pub event_id: EventId,
    /// Per-event group number drawn from the store counter.
    pub match_group: u32,
    /// Round number, starting at 1.
    pub round: u32,
    /// First side (earlier submission).
    pub participant1: ParticipantId,
    /// Second side, `None` for a bye.
    pub participant2: Option<ParticipantId>,
    /// Votes for participant 1.
    pub votes1: u64,
    /// Votes for participant 2.
    pub votes2: u64,
    /// Users that already voted in this match.
    pub voters: BTreeSet<UserId>,
    /// Recorded winner.
    pub winner: Option<ParticipantId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Returns `true` for an automatic-advance match.
    #[must_use]
    pub const fn is_bye(&self) -> bool {
        self.participant2.is_none()
    }

    /// Returns `true` once a winner is recorded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.winner.is_some()
    }

    /// Returns `true` if `participant` plays in this match.
    #[must_use]
    pub fn involves(&self, participant: ParticipantId) -> bool {
        self.participant1 == participant || self.participant2 == Some(participant)
    }

    /// Total votes cast.
    #[must_use]
    pub const fn total_votes(&self) -> u64 {
        self.votes1.saturating_add(self.votes2)
    }

    /// Votes received by `participant` in this match.
    #[must_use]
    pub fn votes_for(&self, participant: ParticipantId) -> u64 {
        if self.participant1 == participant {
            self.votes1
        } else if self.participant2 == Some(participant) {
            self.votes2
        } else {
            0
        }
    }

    /// Records one vote from `voter` for `choice`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conflict`] if the match is complete or the
    /// voter already voted, and [`EngineError::Validation`] if `choice`
    /// does not play in this match or the match is a bye.
    pub fn record_vote(&mut self, voter: UserId, choice: ParticipantId) -> Result<(), EngineError> {
        if self.is_complete() {
            return Err(EngineError::Conflict(format!("{} is already decided", self.id)));
        }
        if self.is_bye() {
            return Err(EngineError::Validation(format!("{} is a bye", self.id)));
        }
        let first = choice == self.participant1;
        if !first && self.participant2 != Some(choice) {
            return Err(EngineError::Validation(format!(
                "{choice} does not play in {}",
                self.id
            )));
        }
        if !self.voters.insert(voter) {
            return Err(EngineError::Conflict(format!(
                "{voter} already voted in {}",
                self.id
            )));
        }
        if first {
            self.votes1 = self.votes1.saturating_add(1);
        } else {
            self.votes2 = self.votes2.saturating_add(1);
        }
        Ok(())
    }

    /// Decides the winner from the current tallies.
    ///
    /// A bye goes to participant 1. A tie also goes to participant 1, who
    /// submitted earlier.
    #[must_use]
    pub fn decide_winner(&self) -> ParticipantId {
        match self.participant2 {
            Some(second) if self.votes2 > self.votes1 => second,
            _ => self.participant1,
        }
    }

    /// Completes the match with the decided winner. No-op when complete.
    pub fn complete(&mut self, now: DateTime<Utc>) -> ParticipantId {
        if let Some(winner) = self.winner {
            return winner;
        }
        let winner = self.decide_winner();
        self.winner = Some(winner);
        self.completed_at = Some(now);
        winner
    }
}

/// Match built by matchmaking, not yet stored.
#[derive(Debug, Clone)]
pub struct NewMatch {
    /// Owning event.
    pub event_id: EventId,
    /// Group number.
    pub match_group: u32,
    /// Round number.
    pub round: u32,
    /// First side.
    pub participant1: ParticipantId,
    /// Second side, `None` for a bye.
    pub participant2: Option<ParticipantId>,
}
