use std::collections::{HashMap, HashSet};

use super::ranked;
use crate::domain::{
    ComputedResult, Event, Match, PairingState, Participant, ParticipantId, ResultType,
    StrategyMetadata, Submission,
};
use crate::error::EngineError;

/// Head-to-head battles decided by match votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BattleStrategy;

impl BattleStrategy {
    /// Battle entries are voted on side by side, so they need media.
    pub(super) fn validate_submission(self, submission: &Submission) -> Result<(), EngineError> {
        if submission.has_media {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "{} has no media to battle with",
                submission.id
            )))
        }
    }

    pub(super) const fn initial_metadata(self) -> StrategyMetadata {
        StrategyMetadata::Battle {
            pairing: PairingState::Waiting,
        }
    }

    /// Match winners rank ahead of everyone else. Inside each group the
    /// order is votes received, descending, then earliest submission, then
    /// lower participant id.
    ///
    /// Every participant must have played a completed match or received a
    /// bye; an entrant without a match means matchmaking has not covered
    /// the field yet.
    pub(super) fn calculate_result(
        self,
        event: &Event,
        participants: &[Participant],
        matches: &[Match],
    ) -> Result<ComputedResult, EngineError> {
        if let Some(open) = matches.iter().find(|m| !m.is_complete()) {
            return Err(EngineError::Consistency(format!(
                "{} of {} is still open",
                open.id, event.id
            )));
        }
        let matched: HashSet<ParticipantId> = matches
            .iter()
            .flat_map(|m| std::iter::once(m.participant1).chain(m.participant2))
            .collect();
        if let Some(unmatched) = participants.iter().find(|p| !matched.contains(&p.id)) {
            return Err(EngineError::Consistency(format!(
                "{} of {} has no match; run matchmaking before finalizing",
                unmatched.id, event.id
            )));
        }

        let winners: HashSet<ParticipantId> = matches.iter().filter_map(|m| m.winner).collect();
        let mut received: HashMap<ParticipantId, u64> = HashMap::new();
        for matchup in matches {
            *received.entry(matchup.participant1).or_default() += matchup.votes1;
            if let Some(second) = matchup.participant2 {
                *received.entry(second).or_default() += matchup.votes2;
            }
        }

        let mut ordered: Vec<&Participant> = participants.iter().collect();
        ordered.sort_by(|a, b| {
            let votes = |p: &Participant| received.get(&p.id).copied().unwrap_or(0);
            winners
                .contains(&b.id)
                .cmp(&winners.contains(&a.id))
                .then_with(|| votes(b).cmp(&votes(a)))
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let placements = ranked(ordered.into_iter().map(|p| {
            (
                p.id,
                p.user_id,
                received.get(&p.id).copied().unwrap_or(0),
            )
        }));

        Ok(ComputedResult {
            result_type: ResultType::BattleWinner,
            total_participants: u32::try_from(participants.len()).unwrap_or(u32::MAX),
            total_votes: matches.iter().map(Match::total_votes).sum(),
            placements,
        })
    }
}
