use super::ranked;
use crate::domain::{ComputedResult, Participant, ResultType, StrategyMetadata};

/// Contests ranked by votes received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RankingStrategy;

impl RankingStrategy {
    pub(super) const fn initial_metadata(self) -> StrategyMetadata {
        StrategyMetadata::Ranking { vote_count: 0 }
    }

    /// Vote count descending; ties go to the earlier submission, then the
    /// lower participant id.
    pub(super) fn calculate_result(self, participants: &[Participant]) -> ComputedResult {
        let mut ordered: Vec<&Participant> = participants.iter().collect();
        ordered.sort_by(|a, b| {
            b.metadata
                .vote_count()
                .cmp(&a.metadata.vote_count())
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let total_votes = participants.iter().map(|p| p.metadata.vote_count()).sum();
        ComputedResult {
            result_type: ResultType::Ranking,
            total_participants: u32::try_from(participants.len()).unwrap_or(u32::MAX),
            total_votes,
            placements: ranked(
                ordered
                    .into_iter()
                    .map(|p| (p.id, p.user_id, p.metadata.vote_count())),
            ),
        }
    }
}
