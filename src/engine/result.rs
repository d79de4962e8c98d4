//! Result finalization.

use std::sync::Arc;

use serde::Serialize;

use super::status::derive_status;
use super::strategy::StrategyFactory;
use crate::clock::Clock;
use crate::domain::{EngineEvent, EventBus, EventId, EventResult, EventStatus, ResultDetail};
use crate::error::EngineError;
use crate::store::{ContestStore, NewResult, NewResultDetail};

/// A stored result with its placement rows.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedResult {
    /// Result row.
    pub result: EventResult,
    /// Placement rows in rank order.
    pub details: Vec<ResultDetail>,
    /// Whether a prior result was replaced.
    pub recalculated: bool,
}

/// Computes and stores event results through the event's strategy.
#[derive(Debug, Clone)]
pub struct ResultCalculator {
    store: Arc<ContestStore>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl ResultCalculator {
    /// Creates a new `ResultCalculator`.
    #[must_use]
    pub fn new(store: Arc<ContestStore>, clock: Arc<dyn Clock>, event_bus: EventBus) -> Self {
        Self {
            store,
            clock,
            event_bus,
        }
    }

    /// Finalizes the result of `event_id`.
    ///
    /// The event must have ended unless `force` is set. Without `force` an
    /// existing result is a conflict; with it the prior result and its
    /// details are replaced. Battle events complete their open matches
    /// first. An event without participants still gets an (empty) result.
    /// Ranks beyond the reward table are recorded with zero rewards.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] for unknown events,
    /// [`EngineError::Conflict`] if the event has not ended or a result
    /// exists, and [`EngineError::Consistency`] if the strategy finds
    /// inconsistent records.
    pub async fn finalize(
        &self,
        event_id: EventId,
        force: bool,
    ) -> Result<FinalizedResult, EngineError> {
        let event = self.store.event(event_id).await?;
        let derived = derive_status(&event.event_window, self.clock.today(), event.status);
        if derived != EventStatus::Ended && !force {
            return Err(EngineError::Conflict(format!(
                "{event_id} is {derived}; results are finalized once it has ended"
            )));
        }
        if !force && self.store.result_for_event(event_id).await.is_some() {
            return Err(EngineError::Conflict(format!(
                "result for {event_id} already exists"
            )));
        }

        let strategy = StrategyFactory::get(event.event_type);
        let now = self.clock.now();
        if strategy.uses_matchmaking() {
            for matchup in self.store.complete_open_matches(event_id, now).await {
                if let Some(winner) = matchup.winner {
                    let _ = self.event_bus.publish(EngineEvent::MatchCompleted {
                        event_id,
                        match_id: matchup.id,
                        winner,
                        timestamp: now,
                    });
                }
            }
        }

        let participants = self.store.participants_for_event(event_id).await;
        let matches = self.store.matches_for_event(event_id).await;
        let computed = strategy.calculate_result(&event, &participants, &matches)?;

        let details = computed
            .placements
            .iter()
            .map(|placement| {
                let tier = event.reward_table.tier_for(placement.rank);
                NewResultDetail {
                    participant_id: placement.participant_id,
                    user_id: placement.user_id,
                    rank: placement.rank,
                    points_earned: tier.map_or(0, |t| t.points),
                    badge_points_earned: tier.map_or(0, |t| t.badge_points),
                    coupon: tier.and_then(|t| t.coupon.clone()),
                }
            })
            .collect();

        let (result, details, recalculated) = self
            .store
            .insert_result(
                NewResult {
                    event_id,
                    result_type: computed.result_type,
                    total_participants: computed.total_participants,
                    total_votes: computed.total_votes,
                    details,
                },
                force,
                now,
            )
            .await?;

        let _ = self.event_bus.publish(EngineEvent::ResultFinalized {
            event_id,
            result_id: result.id,
            placements: details.len(),
            recalculated,
            timestamp: now,
        });
        tracing::info!(
            %event_id,
            result_id = %result.id,
            placements = details.len(),
            recalculated,
            "result finalized"
        );

        Ok(FinalizedResult {
            result,
            details,
            recalculated,
        })
    }
}
