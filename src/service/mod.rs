//! Service layer: business logic orchestration.
//!
//! [`ContestService`] validates requests, delegates to the engine
//! components and emits events through the [`super::domain::EventBus`].

pub mod contest_service;

pub use contest_service::{ContestService, VoteReceipt};
