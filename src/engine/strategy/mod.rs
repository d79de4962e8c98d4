//! Per-type event behavior behind a closed enum.
//!
//! [`StrategyFactory::get`] is an exhaustive match over [`EventType`]:
//! adding a type without a strategy fails to compile. String input goes
//! through [`StrategyFactory::resolve`], which reports unknown names as
//! [`EngineError::NoStrategy`].

mod battle;
mod ranking;

use chrono::NaiveDate;

pub use battle::BattleStrategy;
pub use ranking::RankingStrategy;

use super::status::is_participatable;
use crate::domain::{
    ComputedResult, Event, EventType, Match, NewParticipant, Participant, ParticipantId,
    Placement, ResultType, Submission, UserId, VoteTarget,
};
use crate::error::EngineError;

/// What a strategy needs to know to admit a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipationContext {
    /// Current calendar date.
    pub today: NaiveDate,
    /// Participants already admitted.
    pub current_participants: usize,
}

/// Behavior of one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStrategy {
    /// Head-to-head matches.
    Battle(BattleStrategy),
    /// Vote-count ranking.
    Ranking(RankingStrategy),
}

impl EventStrategy {
    /// Event type this strategy serves.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Battle(_) => EventType::Battle,
            Self::Ranking(_) => EventType::Ranking,
        }
    }

    /// Result type this strategy produces.
    #[must_use]
    pub const fn result_type(&self) -> ResultType {
        match self {
            Self::Battle(_) => ResultType::BattleWinner,
            Self::Ranking(_) => ResultType::Ranking,
        }
    }

    /// Whether participants are paired into matches.
    #[must_use]
    pub const fn uses_matchmaking(&self) -> bool {
        matches!(self, Self::Battle(_))
    }

    /// `true` while the event window is open and the event is not full.
    /// Always recomputed from the dates.
    #[must_use]
    pub fn can_participate(&self, event: &Event, ctx: &ParticipationContext) -> bool {
        let capacity = usize::try_from(event.max_participants).unwrap_or(usize::MAX);
        is_participatable(&event.event_window, ctx.today) && ctx.current_participants < capacity
    }

    /// Checks that `submission` may enter `event` on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] describing the first problem.
    pub fn validate_participation(
        &self,
        event: &Event,
        user_id: UserId,
        submission: &Submission,
    ) -> Result<(), EngineError> {
        if submission.owner() != user_id {
            return Err(EngineError::Validation(format!(
                "{} is owned by {}, not {user_id}",
                submission.id,
                submission.owner()
            )));
        }
        if let Some(posted_under) = submission.event_id.filter(|id| *id != event.id) {
            return Err(EngineError::Validation(format!(
                "{} was posted under {posted_under}, not {}",
                submission.id, event.id
            )));
        }
        match self {
            Self::Battle(strategy) => strategy.validate_submission(submission),
            Self::Ranking(_) => Ok(()),
        }
    }

    /// Builds the participant record with type-specific metadata.
    #[must_use]
    pub fn create_participant(
        &self,
        event: &Event,
        user_id: UserId,
        submission: &Submission,
    ) -> NewParticipant {
        let metadata = match self {
            Self::Battle(strategy) => strategy.initial_metadata(),
            Self::Ranking(strategy) => strategy.initial_metadata(),
        };
        NewParticipant {
            event_id: event.id,
            user_id,
            submission_id: submission.id,
            submitted_at: submission.submitted_at,
            metadata,
        }
    }

    /// Checks that a vote targets what this event type votes on.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] for a target of the wrong kind.
    pub fn validate_vote(&self, target: &VoteTarget) -> Result<(), EngineError> {
        match (self, target) {
            (Self::Battle(_), VoteTarget::Match { .. })
            | (Self::Ranking(_), VoteTarget::Participant { .. }) => Ok(()),
            (Self::Battle(_), VoteTarget::Participant { .. }) => Err(EngineError::Validation(
                "battle votes must target a match".to_string(),
            )),
            (Self::Ranking(_), VoteTarget::Match { .. }) => Err(EngineError::Validation(
                "ranking votes must target a participant".to_string(),
            )),
        }
    }

    /// Ranks the participants of `event`.
    ///
    /// # Errors
    ///
    /// Battle results return [`EngineError::Consistency`] while any match is
    /// still open.
    pub fn calculate_result(
        &self,
        event: &Event,
        participants: &[Participant],
        matches: &[Match],
    ) -> Result<ComputedResult, EngineError> {
        match self {
            Self::Battle(strategy) => strategy.calculate_result(event, participants, matches),
            Self::Ranking(strategy) => Ok(strategy.calculate_result(participants)),
        }
    }
}

/// Resolves event types to strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyFactory;

impl StrategyFactory {
    /// Returns the strategy for `event_type`.
    #[must_use]
    pub const fn get(event_type: EventType) -> EventStrategy {
        match event_type {
            EventType::Battle => EventStrategy::Battle(BattleStrategy),
            EventType::Ranking => EventStrategy::Ranking(RankingStrategy),
        }
    }

    /// Parses a declared type name and returns its strategy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoStrategy`] for unknown names.
    pub fn resolve(declared: &str) -> Result<EventStrategy, EngineError> {
        let event_type: EventType = declared.parse()?;
        Ok(Self::get(event_type))
    }
}

/// Assigns 1-based ranks in the given order.
fn ranked(ordered: impl IntoIterator<Item = (ParticipantId, UserId, u64)>) -> Vec<Placement> {
    ordered
        .into_iter()
        .zip(1u32..)
        .map(|((participant_id, user_id, score), rank)| Placement {
            participant_id,
            user_id,
            rank,
            score,
        })
        .collect()
}
