//! Type-safe record identifiers.
//!
//! Every persisted record is keyed by a monotonic `i64` wrapped in its own
//! newtype so that, for example, a [`ParticipantId`] cannot be passed where
//! a [`UserId`] is expected. Foreign keys between records are plain id
//! fields; the store owns every record.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw identifier.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

record_id!(
    /// Identifier of a contest event.
    EventId,
    "event"
);
record_id!(
    /// Identifier of a user in the external user directory.
    UserId,
    "user"
);
record_id!(
    /// Identifier of a submission in the external content store.
    SubmissionId,
    "submission"
);
record_id!(
    /// Identifier of a participant (one user's entry into one event).
    ParticipantId,
    "participant"
);
record_id!(
    /// Identifier of a battle match.
    MatchId,
    "match"
);
record_id!(
    /// Identifier of a finalized event result.
    ResultId,
    "result"
);
record_id!(
    /// Identifier of one placement row of a result.
    ResultDetailId,
    "result_detail"
);
record_id!(
    /// Identifier of a reward credit event.
    RewardEventId,
    "reward_event"
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        assert_eq!(EventId::new(7).to_string(), "event#7");
        assert_eq!(RewardEventId::new(12).to_string(), "reward_event#12");
    }

    #[test]
    fn serde_is_transparent() {
        let Ok(json) = serde_json::to_string(&ParticipantId::new(42)) else {
            panic!("serialization failed");
        };
        assert_eq!(json, "42");
        let Ok(back) = serde_json::from_str::<ParticipantId>(&json) else {
            panic!("deserialization failed");
        };
        assert_eq!(back, ParticipantId::new(42));
    }

    #[test]
    fn ordering_follows_raw_value() {
        let mut ids = vec![MatchId::new(3), MatchId::new(1), MatchId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![MatchId::new(1), MatchId::new(2), MatchId::new(3)]);
    }
}
