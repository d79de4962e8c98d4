//! Contest events, their time windows and reward tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::EventId;
use crate::error::EngineError;

/// Declared contest type. Each type is served by exactly one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Head-to-head battles decided by votes.
    Battle,
    /// Participants ranked by vote count.
    Ranking,
}

impl EventType {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Battle => "BATTLE",
            Self::Ranking => "RANKING",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BATTLE" => Ok(Self::Battle),
            "RANKING" => Ok(Self::Ranking),
            _ => Err(EngineError::NoStrategy(s.to_string())),
        }
    }
}

/// Lifecycle state derived from the event window and the current date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// The window has not opened yet.
    Upcoming,
    /// Today is inside the window.
    Ongoing,
    /// The window has closed.
    Ended,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Upcoming => "UPCOMING",
            Self::Ongoing => "ONGOING",
            Self::Ended => "ENDED",
        };
        f.write_str(s)
    }
}

/// Inclusive calendar-date window. Either bound may be unknown on records
/// imported from the legacy content model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateWindow {
    /// First day of the window.
    pub start: Option<NaiveDate>,
    /// Last day of the window.
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    /// Creates a window with both bounds known.
    #[must_use]
    pub const fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Returns both bounds when known.
    #[must_use]
    pub const fn bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

/// How a coupon discount is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// `discount_value` is a percentage (1–100).
    Percentage,
    /// `discount_value` is an absolute amount.
    FixedAmount,
}

/// Coupon granted alongside a placement reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponSpec {
    /// Display name of the coupon.
    pub name: String,
    /// Discount kind.
    pub discount_type: DiscountType,
    /// Discount value, interpreted per `discount_type`.
    pub discount_value: i64,
    /// Whether shipping is waived.
    pub free_shipping: bool,
    /// Days the coupon stays valid after issuance.
    pub valid_days: u32,
}

/// Rewards attached to one rank.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardTier {
    /// Points credited to the ledger.
    pub points: i64,
    /// Badge activity points.
    pub badge_points: i64,
    /// Optional coupon.
    pub coupon: Option<CouponSpec>,
}

impl RewardTier {
    /// Returns `true` if this tier grants anything at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.points == 0 && self.badge_points == 0 && self.coupon.is_none()
    }
}

/// Rank → reward mapping configured per event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RewardTable {
    tiers: BTreeMap<u32, RewardTier>,
}

impl RewardTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the tier for `rank`.
    #[must_use]
    pub fn with_tier(mut self, rank: u32, tier: RewardTier) -> Self {
        self.tiers.insert(rank, tier);
        self
    }

    /// Returns the tier for `rank`, if configured.
    #[must_use]
    pub fn tier_for(&self, rank: u32) -> Option<&RewardTier> {
        self.tiers.get(&rank)
    }

    /// Iterates over configured ranks in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &RewardTier)> {
        self.tiers.iter().map(|(rank, tier)| (*rank, tier))
    }

    /// Checks every reward condition against the event's capacity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if a rank is zero or exceeds
    /// `max_participants`, an amount is negative, or a coupon is malformed.
    pub fn validate(&self, max_participants: u32) -> Result<(), EngineError> {
        for (rank, tier) in self.iter() {
            if rank == 0 || rank > max_participants {
                return Err(EngineError::Validation(format!(
                    "reward rank {rank} outside 1..={max_participants}"
                )));
            }
            if tier.points < 0 || tier.badge_points < 0 {
                return Err(EngineError::Validation(format!(
                    "reward for rank {rank} must not be negative"
                )));
            }
            if let Some(coupon) = &tier.coupon {
                let value_ok = match coupon.discount_type {
                    DiscountType::Percentage => (1..=100).contains(&coupon.discount_value),
                    DiscountType::FixedAmount => coupon.discount_value > 0,
                };
                if !value_ok || coupon.name.trim().is_empty() || coupon.valid_days == 0 {
                    return Err(EngineError::Validation(format!(
                        "invalid coupon for rank {rank}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A contest event record.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Human readable title.
    pub title: String,
    /// Declared type; selects the strategy.
    pub event_type: EventType,
    /// Window in which the promoted products can be purchased.
    pub purchase_window: DateWindow,
    /// Window in which users participate and vote.
    pub event_window: DateWindow,
    /// Day results are announced.
    pub announcement_date: Option<NaiveDate>,
    /// Capacity.
    pub max_participants: u32,
    /// Cached status. Advisory only; recompute from the window when it matters.
    pub status: EventStatus,
    /// Rank → reward mapping.
    pub reward_table: RewardTable,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Returns `true` once the event has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Authoring input for a new event. Every date is required.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Title.
    pub title: String,
    /// Declared type.
    pub event_type: EventType,
    /// Purchase window start.
    pub purchase_start: NaiveDate,
    /// Purchase window end.
    pub purchase_end: NaiveDate,
    /// Event window start.
    pub event_start: NaiveDate,
    /// Event window end.
    pub event_end: NaiveDate,
    /// Announcement day.
    pub announcement_date: NaiveDate,
    /// Capacity.
    pub max_participants: u32,
    /// Reward table.
    pub reward_table: RewardTable,
}

impl NewEvent {
    /// Validates the whole request before anything is constructed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        if self.max_participants == 0 {
            return Err(EngineError::Validation(
                "max_participants must be positive".to_string(),
            ));
        }
        if self.purchase_start > self.purchase_end {
            return Err(EngineError::Validation(
                "purchase window start is after its end".to_string(),
            ));
        }
        if self.event_start > self.event_end {
            return Err(EngineError::Validation(
                "event window start is after its end".to_string(),
            ));
        }
        if self.event_start < self.purchase_start {
            return Err(EngineError::Validation(
                "event window must not start before the purchase window".to_string(),
            ));
        }
        if self.event_end < self.purchase_end {
            return Err(EngineError::Validation(
                "event window must not end before the purchase window".to_string(),
            ));
        }
        if self.announcement_date < self.event_end {
            return Err(EngineError::Validation(
                "announcement date must not precede the event end".to_string(),
            ));
        }
        self.reward_table.validate(self.max_participants)
    }

    /// Rebuilds an authoring request from an existing event so updates can
    /// be validated with the same rules.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the stored event lacks any date.
    pub fn from_event(event: &Event) -> Result<Self, EngineError> {
        let missing = || {
            EngineError::Validation(format!("{} has incomplete dates", event.id))
        };
        let (purchase_start, purchase_end) =
            event.purchase_window.bounds().ok_or_else(missing)?;
        let (event_start, event_end) = event.event_window.bounds().ok_or_else(missing)?;
        Ok(Self {
            title: event.title.clone(),
            event_type: event.event_type,
            purchase_start,
            purchase_end,
            event_start,
            event_end,
            announcement_date: event.announcement_date.ok_or_else(missing)?,
            max_participants: event.max_participants,
            reward_table: event.reward_table.clone(),
        })
    }
}

/// Partial update of an event. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct EventUpdate {
    /// New title.
    pub title: Option<String>,
    /// New purchase window.
    pub purchase_window: Option<(NaiveDate, NaiveDate)>,
    /// New event window.
    pub event_window: Option<(NaiveDate, NaiveDate)>,
    /// New announcement date.
    pub announcement_date: Option<NaiveDate>,
    /// New capacity.
    pub max_participants: Option<u32>,
    /// New reward table.
    pub reward_table: Option<RewardTable>,
}

impl EventUpdate {
    /// Merges this update over `base`.
    #[must_use]
    pub fn merge_into(self, mut base: NewEvent) -> NewEvent {
        if let Some(title) = self.title {
            base.title = title;
        }
        if let Some((start, end)) = self.purchase_window {
            base.purchase_start = start;
            base.purchase_end = end;
        }
        if let Some((start, end)) = self.event_window {
            base.event_start = start;
            base.event_end = end;
        }
        if let Some(date) = self.announcement_date {
            base.announcement_date = date;
        }
        if let Some(max) = self.max_participants {
            base.max_participants = max;
        }
        if let Some(table) = self.reward_table {
            base.reward_table = table;
        }
        base
    }
}
