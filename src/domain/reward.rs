//! Reward credit events: the unit of work of reward settlement.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::event::CouponSpec;
use super::{EventId, MatchId, ParticipantId, ResultDetailId, RewardEventId, UserId};

/// Kind of action being rewarded. Each kind has its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardType {
    /// Placement reward from a finalized result.
    EventReward,
    /// Entering an event.
    EventParticipation,
    /// Voting in a battle match.
    BattleVote,
    /// Voting for a ranking participant.
    RankingVote,
}

impl RewardType {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EventReward => "EVENT_REWARD",
            Self::EventParticipation => "EVENT_PARTICIPATION",
            Self::BattleVote => "BATTLE_VOTE",
            Self::RankingVote => "RANKING_VOTE",
        }
    }

    /// Activity type recorded in the badge activity log.
    #[must_use]
    pub const fn badge_activity(self) -> &'static str {
        match self {
            Self::EventReward => "EVENT_WIN",
            Self::EventParticipation => "EVENT_PARTICIPATION",
            Self::BattleVote | Self::RankingVote => "EVENT_VOTE",
        }
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement state of a reward credit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardStatus {
    /// Waiting for a sweep.
    Pending,
    /// Claimed by a sweep.
    Processing,
    /// Credited. Terminal.
    Processed,
    /// Last attempt failed. Terminal once retries are exhausted.
    Failed,
}

impl fmt::Display for RewardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What a reward is granted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RewardSubject {
    /// An event (placement or participation).
    Event(EventId),
    /// A battle match (vote).
    Match(MatchId),
    /// A ranking participant (vote).
    Participant(ParticipantId),
}

impl RewardSubject {
    /// Subject type name passed to the badge activity log.
    #[must_use]
    pub const fn subject_type(&self) -> &'static str {
        match self {
            Self::Event(_) => "EVENT",
            Self::Match(_) => "MATCH",
            Self::Participant(_) => "PARTICIPANT",
        }
    }

    /// Raw subject identifier.
    #[must_use]
    pub const fn raw_id(&self) -> i64 {
        match self {
            Self::Event(id) => id.get(),
            Self::Match(id) => id.get(),
            Self::Participant(id) => id.get(),
        }
    }
}

impl fmt::Display for RewardSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "{id}"),
            Self::Match(id) => write!(f, "{id}"),
            Self::Participant(id) => write!(f, "{id}"),
        }
    }
}

/// Idempotency key: at most one PROCESSED row may exist per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CreditKey {
    /// Rewarded user.
    pub user_id: UserId,
    /// Rewarded subject.
    pub subject: RewardSubject,
    /// Reward kind.
    pub reward_type: RewardType,
}

/// Rendered as `TYPE:subject:user`, the reference handed to collaborators
/// so they can drop a repeated credit.
impl fmt::Display for CreditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.reward_type, self.subject, self.user_id)
    }
}

/// Reward policy supplied by the policy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPolicy {
    /// Reward kind the policy applies to.
    pub reward_type: RewardType,
    /// Default points credited when the payload does not carry an amount.
    pub points: i64,
    /// Maximum grants per user per day; `None` means unlimited.
    pub daily_limit: Option<u32>,
}

/// What to credit, stored as the event's JSON context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditPayload {
    /// Points override; the policy amount applies when `None`.
    pub points: Option<i64>,
    /// Badge points recorded with the activity.
    #[serde(default)]
    pub badge_points: i64,
    /// Coupon to issue.
    pub coupon: Option<CouponSpec>,
    /// Placement being settled, if any.
    pub result_detail_id: Option<ResultDetailId>,
    /// Rank of the placement.
    pub rank: Option<u32>,
    /// Human readable reason passed to collaborators.
    pub reason: String,
}

/// One credit attempt for one (user, subject, reward type).
#[derive(Debug, Clone, Serialize)]
pub struct RewardCreditEvent {
    /// Row identifier.
    pub id: RewardEventId,
    /// Rewarded user.
    pub user_id: UserId,
    /// Rewarded subject.
    pub subject: RewardSubject,
    /// Reward kind.
    pub reward_type: RewardType,
    /// Current state.
    pub status: RewardStatus,
    /// Retry attempts made by the retry sweep.
    pub retry_count: u32,
    /// Serialized [`CreditPayload`].
    pub context: serde_json::Value,
    /// Last failure message.
    pub error_message: Option<String>,
    /// Ledger receipt reference once points are credited.
    pub ledger_ref: Option<String>,
    /// Set while a ledger call is outstanding; stays set when the call
    /// timed out, since the credit may have landed anyway.
    pub ledger_in_doubt: bool,
    /// Set once the badge activity is recorded.
    pub badge_recorded: bool,
    /// Issued coupon code.
    pub coupon_code: Option<String>,
    /// Row that owns this key when this one lost the duplicate check.
    pub superseded_by: Option<RewardEventId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Business date of creation; daily limits count rows by this date.
    pub created_on: NaiveDate,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the row reached PROCESSED.
    pub processed_at: Option<DateTime<Utc>>,
}

impl RewardCreditEvent {
    /// Idempotency key of this row.
    #[must_use]
    pub const fn key(&self) -> CreditKey {
        CreditKey {
            user_id: self.user_id,
            subject: self.subject,
            reward_type: self.reward_type,
        }
    }

    /// `true` for rows that block a new row with the same key.
    #[must_use]
    pub const fn blocks_duplicates(&self) -> bool {
        matches!(
            self.status,
            RewardStatus::Pending | RewardStatus::Processing | RewardStatus::Processed
        )
    }

    /// `true` when the retry sweep may still pick the row up.
    #[must_use]
    pub const fn is_retryable(&self, max_retries: u32) -> bool {
        matches!(self.status, RewardStatus::Failed)
            && self.retry_count < max_retries
            && self.superseded_by.is_none()
    }
}

/// Result of a creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationOutcome {
    /// A new PENDING row was written.
    Created(RewardEventId),
    /// A live row already covers the key.
    Duplicate(RewardEventId),
    /// The user already reached today's limit for the reward type.
    DailyLimitReached {
        /// Policy limit.
        limit: u32,
        /// Rows counted against the limit.
        granted_today: u32,
    },
}

impl CreationOutcome {
    /// Identifier of the created row, if any.
    #[must_use]
    pub const fn created(&self) -> Option<RewardEventId> {
        match self {
            Self::Created(id) => Some(*id),
            Self::Duplicate(_) | Self::DailyLimitReached { .. } => None,
        }
    }
}

/// Result of processing one claimed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Credited.
    Processed {
        /// Ledger reference, when points were credited.
        ledger_ref: Option<String>,
    },
    /// Failed; may be retried.
    Failed {
        /// Failure message.
        error: String,
        /// `true` when no retry remains.
        terminal: bool,
    },
    /// Another row already owns the key.
    Superseded {
        /// Owning row.
        by: RewardEventId,
    },
}

/// Counters of one settlement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SettlementSummary {
    /// Rows attempted.
    pub total: usize,
    /// Rows that reached PROCESSED.
    pub succeeded: usize,
    /// Rows that failed or were superseded.
    pub failed: usize,
}

/// Counters of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    /// Rows loaded by the batch query.
    pub loaded: usize,
    /// Rows this sweep claimed.
    pub claimed: usize,
    /// Rows credited.
    pub processed: usize,
    /// Rows failed or superseded.
    pub failed: usize,
    /// Rows claimed elsewhere before this sweep reached them.
    pub skipped: usize,
}
