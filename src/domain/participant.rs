//! Participants, submissions and per-strategy participant metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, ParticipantId, SubmissionId, UserId};

/// A piece of user content held by the external content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submission identifier.
    pub id: SubmissionId,
    /// Author of the submission.
    pub owner: UserId,
    /// Event the content was posted under, if any.
    pub event_id: Option<EventId>,
    /// When the content was submitted. Drives matchmaking order.
    pub submitted_at: DateTime<Utc>,
    /// Whether the content carries an image or video.
    pub has_media: bool,
}

impl Submission {
    /// Returns the submitting user.
    #[must_use]
    pub const fn owner(&self) -> UserId {
        self.owner
    }
}

/// Pairing state of a battle participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PairingState {
    /// Not referenced by any match yet.
    Waiting,
    /// Paired against an opponent in `match_group`.
    Paired {
        /// Match group the participant plays in.
        match_group: u32,
    },
    /// Left unpaired and advanced automatically.
    Bye {
        /// Match group of the bye match.
        match_group: u32,
    },
}

/// Opaque per-strategy participant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyMetadata {
    /// Battle pairing state.
    Battle {
        /// Current pairing.
        pairing: PairingState,
    },
    /// Ranking counters.
    Ranking {
        /// Votes received so far.
        vote_count: u64,
    },
}

impl StrategyMetadata {
    /// Ranking vote count, or zero for battle participants.
    #[must_use]
    pub const fn vote_count(&self) -> u64 {
        match self {
            Self::Ranking { vote_count } => *vote_count,
            Self::Battle { .. } => 0,
        }
    }
}

/// One user's entry into one event. Unique per (event, user).
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Owning event.
    pub event_id: EventId,
    /// Participating user.
    pub user_id: UserId,
    /// Content entered with.
    pub submission_id: SubmissionId,
    /// Submission time copied from the content.
    pub submitted_at: DateTime<Utc>,
    /// Strategy-specific state.
    pub metadata: StrategyMetadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Participant built by a strategy, not yet stored.
#[derive(Debug, Clone)]
pub struct NewParticipant {
    /// Owning event.
    pub event_id: EventId,
    /// Participating user.
    pub user_id: UserId,
    /// Content entered with.
    pub submission_id: SubmissionId,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Initial strategy state.
    pub metadata: StrategyMetadata,
}

/// What a vote is cast for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum VoteTarget {
    /// One side of a battle match.
    Match {
        /// Match voted in.
        match_id: super::MatchId,
        /// Participant voted for.
        choice: ParticipantId,
    },
    /// A ranking participant.
    Participant {
        /// Participant voted for.
        participant_id: ParticipantId,
    },
}
