//! Finalized event results and per-participant placements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::CouponSpec;
use super::{EventId, ParticipantId, ResultDetailId, ResultId, UserId};

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    /// Battle winners ranked ahead of eliminated participants.
    BattleWinner,
    /// Participants sorted by votes.
    Ranking,
}

/// The single finalized outcome of an event.
#[derive(Debug, Clone, Serialize)]
pub struct EventResult {
    /// Result identifier.
    pub id: ResultId,
    /// Owning event.
    pub event_id: EventId,
    /// Producing strategy.
    pub result_type: ResultType,
    /// Participants considered.
    pub total_participants: u32,
    /// Votes counted.
    pub total_votes: u64,
    /// Finalization timestamp.
    pub created_at: DateTime<Utc>,
}

/// One placement row with the reward it entitles.
#[derive(Debug, Clone, Serialize)]
pub struct ResultDetail {
    /// Detail identifier.
    pub id: ResultDetailId,
    /// Owning result.
    pub result_id: ResultId,
    /// Owning event.
    pub event_id: EventId,
    /// Placed participant.
    pub participant_id: ParticipantId,
    /// Placed user.
    pub user_id: UserId,
    /// 1-based rank.
    pub rank: u32,
    /// Points to credit.
    pub points_earned: i64,
    /// Badge points to record.
    pub badge_points_earned: i64,
    /// Coupon to issue.
    pub coupon: Option<CouponSpec>,
    /// Set once settlement credited (or skipped) the reward. Never reset.
    pub reward_processed: bool,
}

impl ResultDetail {
    /// Returns `true` if this placement grants anything.
    #[must_use]
    pub const fn has_reward(&self) -> bool {
        self.points_earned > 0 || self.badge_points_earned > 0 || self.coupon.is_some()
    }
}

/// Strategy output for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Placed participant.
    pub participant_id: ParticipantId,
    /// Placed user.
    pub user_id: UserId,
    /// 1-based rank.
    pub rank: u32,
    /// Score the rank was derived from (votes).
    pub score: u64,
}

/// Strategy output for a whole event.
#[derive(Debug, Clone)]
pub struct ComputedResult {
    /// Producing strategy.
    pub result_type: ResultType,
    /// Participants considered.
    pub total_participants: u32,
    /// Votes counted.
    pub total_votes: u64,
    /// Placements ordered by rank.
    pub placements: Vec<Placement>,
}
