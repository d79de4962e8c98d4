//! Engine error types with category and error code mapping.
//!
//! [`EngineError`] is the central error type for the engine. Each variant
//! belongs to an [`ErrorKind`] that tells callers (and scheduled jobs)
//! whether the failure is the caller's fault, a missing record, a state
//! conflict or a transient collaborator failure.

use std::fmt;

use crate::collaborators::CollaboratorError;
use crate::domain::{
    EventId, MatchId, ParticipantId, RewardEventId, RewardType, UserId,
};

/// Broad failure category of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input. Reported synchronously, never retried.
    Validation,
    /// A referenced record does not exist.
    NotFound,
    /// The operation conflicts with current state.
    Conflict,
    /// An external collaborator failed; the work may be retried.
    Transient,
    /// Stored records disagree with each other.
    Consistency,
    /// Unexpected internal failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Consistency => "consistency",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Engine error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category    |
/// |-----------|-------------|
/// | 1000–1999 | Validation  |
/// | 2000–2999 | Not Found   |
/// | 3000–3999 | Conflict    |
/// | 4000–4999 | Transient   |
/// | 5000–5999 | Consistency |
/// | 9000–9999 | Internal    |
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Declared event type has no strategy.
    #[error("no strategy registered for event type {0:?}")]
    NoStrategy(String),

    /// Event with the given ID was not found (or is soft-deleted).
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// No result has been finalized for the event.
    #[error("result not found for event {0}")]
    ResultNotFound(EventId),

    /// User directory has no such user.
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// No reward policy is configured for the reward type.
    #[error("no reward policy for {0}")]
    PolicyNotFound(RewardType),

    /// Reward credit event not found.
    #[error("reward event not found: {0}")]
    RewardEventNotFound(RewardEventId),

    /// Participant not found.
    #[error("participant not found: {0}")]
    ParticipantNotFound(ParticipantId),

    /// Match not found.
    #[error("match not found: {0}")]
    MatchNotFound(MatchId),

    /// Operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// External collaborator call failed.
    #[error("external call failed: {0}")]
    Transient(#[from] CollaboratorError),

    /// Stored records disagree.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the failure category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::NoStrategy(_) => ErrorKind::Validation,
            Self::EventNotFound(_)
            | Self::ResultNotFound(_)
            | Self::UserNotFound(_)
            | Self::PolicyNotFound(_)
            | Self::RewardEventNotFound(_)
            | Self::ParticipantNotFound(_)
            | Self::MatchNotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) | Self::Persistence(_) => ErrorKind::Transient,
            Self::Consistency(_) => ErrorKind::Consistency,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::NoStrategy(_) => 1002,
            Self::EventNotFound(_) => 2001,
            Self::ResultNotFound(_) => 2002,
            Self::UserNotFound(_) => 2003,
            Self::PolicyNotFound(_) => 2004,
            Self::RewardEventNotFound(_) => 2005,
            Self::ParticipantNotFound(_) => 2006,
            Self::MatchNotFound(_) => 2007,
            Self::Conflict(_) => 3001,
            Self::Transient(_) => 4001,
            Self::Persistence(_) => 4002,
            Self::Consistency(_) => 5001,
            Self::Internal(_) => 9000,
        }
    }

    /// Returns `true` if the retry sweep may pick the failed work up again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_in_category_ranges() {
        let cases = [
            EngineError::Validation("bad".to_string()),
            EngineError::EventNotFound(EventId::new(1)),
            EngineError::Conflict("dup".to_string()),
            EngineError::Transient(CollaboratorError::Unavailable("down".to_string())),
            EngineError::Consistency("mismatch".to_string()),
            EngineError::Internal("boom".to_string()),
        ];
        let ranges = [1000..2000, 2000..3000, 3000..4000, 4000..5000, 5000..6000, 9000..10000];
        for (err, range) in cases.iter().zip(ranges) {
            assert!(range.contains(&err.error_code()), "{err} -> {}", err.error_code());
        }
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        let timeout = EngineError::from(CollaboratorError::Timeout {
            operation: "point_ledger.credit",
            timeout_ms: 50,
        });
        assert_eq!(timeout.kind(), ErrorKind::Transient);
        assert!(timeout.is_retryable());
        assert!(!EngineError::Conflict("x".to_string()).is_retryable());
        assert!(!EngineError::UserNotFound(UserId::new(3)).is_retryable());
    }

    #[test]
    fn display_includes_identifier() {
        let err = EngineError::PolicyNotFound(RewardType::BattleVote);
        assert_eq!(err.to_string(), "no reward policy for BATTLE_VOTE");
    }
}
