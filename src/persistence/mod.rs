//! Persistence layer: PostgreSQL journal of engine events.
//!
//! The engine's working state lives in [`crate::store::ContestStore`]; the
//! journal is an append-only audit trail fed from the
//! [`crate::domain::EventBus`] by [`journal::spawn_writer`]. Rows older
//! than the retention window are pruned by the cleanup job.

pub mod journal;
pub mod models;
pub mod postgres;

pub use journal::{spawn_writer, JournalSink};
pub use models::JournalEntry;
pub use postgres::PostgresJournal;
