//! Domain layer: records, identifiers and the event system.
//!
//! Records are plain structs keyed by typed ids with explicit foreign-key
//! fields; [`crate::store::ContestStore`] owns all of them.

pub mod engine_event;
pub mod event;
pub mod event_bus;
pub mod ids;
pub mod matchup;
pub mod participant;
pub mod result;
pub mod reward;

pub use engine_event::EngineEvent;
pub use event::{
    CouponSpec, DateWindow, DiscountType, Event, EventStatus, EventType, EventUpdate, NewEvent,
    RewardTable, RewardTier,
};
pub use event_bus::EventBus;
pub use ids::{
    EventId, MatchId, ParticipantId, ResultDetailId, ResultId, RewardEventId, SubmissionId,
    UserId,
};
pub use matchup::{Match, NewMatch};
pub use participant::{
    NewParticipant, PairingState, Participant, StrategyMetadata, Submission, VoteTarget,
};
pub use result::{ComputedResult, EventResult, Placement, ResultDetail, ResultType};
pub use reward::{
    CreationOutcome, CreditKey, CreditPayload, ProcessOutcome, RewardCreditEvent, RewardPolicy,
    RewardStatus, RewardSubject, RewardType, SettlementSummary, SweepReport,
};
