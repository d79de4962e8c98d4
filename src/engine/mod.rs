//! Core engine: lifecycle, strategies, matchmaking, results, settlement and
//! legacy migration.
//!
//! Every component is a cheap-to-clone handle over the shared
//! [`crate::store::ContestStore`], the injected [`crate::clock::Clock`]
//! and the [`crate::domain::EventBus`]. Components coordinate only through
//! stored state.

pub mod matchmaking;
pub mod migration;
pub mod result;
pub mod settlement;
pub mod status;
pub mod strategy;

pub use matchmaking::{plan_pairings, Matchmaker, Pairing};
pub use migration::{MigrationAdapter, MigrationResult};
pub use result::{FinalizedResult, ResultCalculator};
pub use settlement::{EnqueueReport, SettlementPipeline, SettlementSettings};
pub use status::{derive_status, is_due_for_result, is_participatable, StatusEngine, StatusSync};
pub use strategy::{
    BattleStrategy, EventStrategy, ParticipationContext, RankingStrategy, StrategyFactory,
};
