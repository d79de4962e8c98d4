//! Domain events reflecting engine state changes.
//!
//! Every state change emits an [`EngineEvent`] through the
//! [`super::EventBus`]. Events are optionally appended to the PostgreSQL
//! journal by [`crate::persistence::journal`].

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    EventId, EventStatus, EventType, MatchId, ParticipantId, ResultId, RewardEventId, RewardType,
    UserId,
};

/// Domain event emitted after every state mutation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new contest event was authored.
    EventCreated {
        /// Event identifier.
        event_id: EventId,
        /// Declared type.
        event_kind: EventType,
        /// Creation timestamp.
        timestamp: DateTime<Utc>,
    },

    /// An event was soft-deleted.
    EventDeleted {
        /// Event identifier.
        event_id: EventId,
        /// Deletion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Reconciliation rewrote the cached status.
    EventStatusChanged {
        /// Event identifier.
        event_id: EventId,
        /// Previous cached status.
        from: EventStatus,
        /// Newly derived status.
        to: EventStatus,
        /// Reconciliation timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A user entered an event.
    ParticipantJoined {
        /// Event identifier.
        event_id: EventId,
        /// New participant.
        participant_id: ParticipantId,
        /// Participating user.
        user_id: UserId,
        /// Join timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Matchmaking created new matches.
    MatchesGenerated {
        /// Event identifier.
        event_id: EventId,
        /// Number of matches created.
        count: usize,
        /// Number of bye matches among them.
        byes: usize,
        /// Generation timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A match recorded its winner.
    MatchCompleted {
        /// Event identifier.
        event_id: EventId,
        /// Completed match.
        match_id: MatchId,
        /// Winning participant.
        winner: ParticipantId,
        /// Completion timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A result was finalized.
    ResultFinalized {
        /// Event identifier.
        event_id: EventId,
        /// New result.
        result_id: ResultId,
        /// Number of placement rows.
        placements: usize,
        /// Whether a prior result was replaced.
        recalculated: bool,
        /// Finalization timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A reward credit event entered PENDING.
    RewardQueued {
        /// Reward row.
        reward_event_id: RewardEventId,
        /// Rewarded user.
        user_id: UserId,
        /// Reward kind.
        reward_type: RewardType,
        /// Queue timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A reward credit event reached PROCESSED.
    RewardProcessed {
        /// Reward row.
        reward_event_id: RewardEventId,
        /// Rewarded user.
        user_id: UserId,
        /// Ledger reference, when points were credited.
        ledger_ref: Option<String>,
        /// Processing timestamp.
        timestamp: DateTime<Utc>,
    },

    /// A reward credit event failed.
    RewardFailed {
        /// Reward row.
        reward_event_id: RewardEventId,
        /// Rewarded user.
        user_id: UserId,
        /// Failure message.
        error: String,
        /// Retry attempts made so far.
        retry_count: u32,
        /// `true` when no retry remains.
        terminal: bool,
        /// Failure timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Legacy content was imported for an event.
    MigrationCompleted {
        /// Event identifier.
        event_id: EventId,
        /// Participants created.
        participants_migrated: usize,
        /// Matches created.
        matches_migrated: usize,
        /// Consistency problems found.
        inconsistencies: usize,
        /// Completion timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Returns the contest event this domain event belongs to, if any.
    #[must_use]
    pub const fn event_id(&self) -> Option<EventId> {
        match self {
            Self::EventCreated { event_id, .. }
            | Self::EventDeleted { event_id, .. }
            | Self::EventStatusChanged { event_id, .. }
            | Self::ParticipantJoined { event_id, .. }
            | Self::MatchesGenerated { event_id, .. }
            | Self::MatchCompleted { event_id, .. }
            | Self::ResultFinalized { event_id, .. }
            | Self::MigrationCompleted { event_id, .. } => Some(*event_id),
            Self::RewardQueued { .. }
            | Self::RewardProcessed { .. }
            | Self::RewardFailed { .. } => None,
        }
    }

    /// When the change happened.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EventCreated { timestamp, .. }
            | Self::EventDeleted { timestamp, .. }
            | Self::EventStatusChanged { timestamp, .. }
            | Self::ParticipantJoined { timestamp, .. }
            | Self::MatchesGenerated { timestamp, .. }
            | Self::MatchCompleted { timestamp, .. }
            | Self::ResultFinalized { timestamp, .. }
            | Self::RewardQueued { timestamp, .. }
            | Self::RewardProcessed { timestamp, .. }
            | Self::RewardFailed { timestamp, .. }
            | Self::MigrationCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::EventCreated { .. } => "event_created",
            Self::EventDeleted { .. } => "event_deleted",
            Self::EventStatusChanged { .. } => "event_status_changed",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::MatchesGenerated { .. } => "matches_generated",
            Self::MatchCompleted { .. } => "match_completed",
            Self::ResultFinalized { .. } => "result_finalized",
            Self::RewardQueued { .. } => "reward_queued",
            Self::RewardProcessed { .. } => "reward_processed",
            Self::RewardFailed { .. } => "reward_failed",
            Self::MigrationCompleted { .. } => "migration_completed",
        }
    }
}
