//! # contest-engine
//!
//! Event lifecycle, battle matchmaking, result finalization and idempotent
//! reward settlement for user-generated-content contests.
//!
//! Operators author time-boxed events of a declared type (`BATTLE` or
//! `RANKING`). Users enter with content they own and vote while the event
//! window is open. When the window closes and the announcement date
//! arrives, the event's strategy ranks the participants, the result is
//! frozen and every placement's reward is credited exactly once through
//! external collaborators (point ledger, badge activity log, coupon
//! issuer).
//!
//! ## Architecture
//!
//! ```text
//! Scheduler (scheduler/) ── ticks ──► Jobs (jobs/)
//!     │
//!     ├── ContestService (service/)
//!     ├── EventBus (domain/) ──► Journal writer (persistence/)
//!     │
//!     ├── Engine (engine/)
//!     │     status · strategy · matchmaking · result · settlement · migration
//!     │
//!     ├── ContestStore (store/)
//!     └── Collaborators (collaborators/)
//! ```

pub mod app_state;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod persistence;
pub mod scheduler;
pub mod service;
pub mod store;

#[cfg(test)]
mod test_support;
