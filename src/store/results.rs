//! Result and result-detail tables.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::{ContestStore, next_id};
use crate::domain::{
    CouponSpec, EventId, EventResult, ParticipantId, ResultDetail, ResultDetailId, ResultId,
    ResultType, UserId,
};
use crate::error::EngineError;

#[derive(Debug, Default)]
pub(super) struct ResultTable {
    results: BTreeMap<ResultId, EventResult>,
    by_event: HashMap<EventId, ResultId>,
    details: BTreeMap<ResultDetailId, ResultDetail>,
}

impl ResultTable {
    fn remove_for_event(&mut self, event_id: EventId) -> Option<ResultId> {
        let result_id = self.by_event.remove(&event_id)?;
        self.results.remove(&result_id);
        self.details.retain(|_, d| d.result_id != result_id);
        Some(result_id)
    }
}

/// Result to store, assembled by the result calculator.
#[derive(Debug, Clone)]
pub struct NewResult {
    /// Owning event.
    pub event_id: EventId,
    /// Producing strategy.
    pub result_type: ResultType,
    /// Participants considered.
    pub total_participants: u32,
    /// Votes counted.
    pub total_votes: u64,
    /// Placement rows, in rank order.
    pub details: Vec<NewResultDetail>,
}

/// Placement row to store.
#[derive(Debug, Clone)]
pub struct NewResultDetail {
    /// Placed participant.
    pub participant_id: ParticipantId,
    /// Placed user.
    pub user_id: UserId,
    /// 1-based rank.
    pub rank: u32,
    /// Points to credit.
    pub points_earned: i64,
    /// Badge points to record.
    pub badge_points_earned: i64,
    /// Coupon to issue.
    pub coupon: Option<CouponSpec>,
}

impl ContestStore {
    /// Stores a result and its details in one step.
    ///
    /// Without `replace`, an existing result for the event is a conflict.
    /// With `replace`, the prior result and its details are deleted first.
    /// Returns the stored result, its details and whether a prior result
    /// was replaced.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Conflict`] if a result exists and `replace`
    /// is `false`.
    pub async fn insert_result(
        &self,
        new: NewResult,
        replace: bool,
        now: DateTime<Utc>,
    ) -> Result<(EventResult, Vec<ResultDetail>, bool), EngineError> {
        let mut table = self.results.write().await;
        let replaced = if table.by_event.contains_key(&new.event_id) {
            if !replace {
                return Err(EngineError::Conflict(format!(
                    "result for {} already exists",
                    new.event_id
                )));
            }
            table.remove_for_event(new.event_id).is_some()
        } else {
            false
        };

        let result = EventResult {
            id: ResultId::new(next_id(&self.sequences.result)),
            event_id: new.event_id,
            result_type: new.result_type,
            total_participants: new.total_participants,
            total_votes: new.total_votes,
            created_at: now,
        };
        let mut details = Vec::with_capacity(new.details.len());
        for row in new.details {
            let detail = ResultDetail {
                id: ResultDetailId::new(next_id(&self.sequences.detail)),
                result_id: result.id,
                event_id: result.event_id,
                participant_id: row.participant_id,
                user_id: row.user_id,
                rank: row.rank,
                points_earned: row.points_earned,
                badge_points_earned: row.badge_points_earned,
                coupon: row.coupon,
                reward_processed: false,
            };
            table.details.insert(detail.id, detail.clone());
            details.push(detail);
        }
        table.by_event.insert(result.event_id, result.id);
        table.results.insert(result.id, result.clone());
        Ok((result, details, replaced))
    }

    /// Returns the result of an event, if finalized.
    pub async fn result_for_event(&self, event_id: EventId) -> Option<EventResult> {
        let table = self.results.read().await;
        table
            .by_event
            .get(&event_id)
            .and_then(|id| table.results.get(id))
            .cloned()
    }

    /// Returns the details of an event's current result in rank order.
    pub async fn details_for_event(&self, event_id: EventId) -> Vec<ResultDetail> {
        let table = self.results.read().await;
        let Some(result_id) = table.by_event.get(&event_id).copied() else {
            return Vec::new();
        };
        let mut details: Vec<ResultDetail> = table
            .details
            .values()
            .filter(|d| d.result_id == result_id)
            .cloned()
            .collect();
        details.sort_by_key(|d| (d.rank, d.id));
        details
    }

    /// Returns one detail row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Consistency`] if the row no longer exists
    /// (its result was recalculated).
    pub async fn result_detail(&self, id: ResultDetailId) -> Result<ResultDetail, EngineError> {
        self.results
            .read()
            .await
            .details
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::Consistency(format!("{id} no longer exists")))
    }

    /// Marks a detail's reward as processed. Returns `false` when it
    /// already was. The flag never goes back to `false`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Consistency`] if the row no longer exists.
    pub async fn mark_detail_processed(&self, id: ResultDetailId) -> Result<bool, EngineError> {
        let mut table = self.results.write().await;
        let detail = table
            .details
            .get_mut(&id)
            .ok_or_else(|| EngineError::Consistency(format!("{id} no longer exists")))?;
        if detail.reward_processed {
            return Ok(false);
        }
        detail.reward_processed = true;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn new_result(event: i64, ranks: u32) -> NewResult {
        NewResult {
            event_id: EventId::new(event),
            result_type: ResultType::Ranking,
            total_participants: ranks,
            total_votes: 0,
            details: (1..=ranks)
                .map(|rank| NewResultDetail {
                    participant_id: ParticipantId::new(i64::from(rank)),
                    user_id: UserId::new(i64::from(rank)),
                    rank,
                    points_earned: 0,
                    badge_points_earned: 0,
                    coupon: None,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn second_insert_without_replace_conflicts() {
        let store = ContestStore::new();
        assert!(store.insert_result(new_result(1, 2), false, Utc::now()).await.is_ok());
        let again = store.insert_result(new_result(1, 2), false, Utc::now()).await;
        assert!(matches!(again, Err(EngineError::Conflict(_))));
    }

    #[tokio::test]
    async fn replace_drops_prior_details() {
        let store = ContestStore::new();
        let Ok((first, _, replaced)) = store
            .insert_result(new_result(1, 3), false, Utc::now())
            .await
        else {
            panic!("insert failed");
        };
        assert!(!replaced);
        let Ok((second, details, replaced)) =
            store.insert_result(new_result(1, 2), true, Utc::now()).await
        else {
            panic!("replace failed");
        };
        assert!(replaced);
        assert_ne!(first.id, second.id);
        assert_eq!(details.len(), 2);
        assert_eq!(store.details_for_event(EventId::new(1)).await.len(), 2);
    }

    #[tokio::test]
    async fn processed_flag_is_monotonic() {
        let store = ContestStore::new();
        let Ok((_, details, _)) = store.insert_result(new_result(1, 1), false, Utc::now()).await
        else {
            panic!("insert failed");
        };
        let Some(detail) = details.first() else {
            panic!("missing detail");
        };
        assert!(matches!(store.mark_detail_processed(detail.id).await, Ok(true)));
        assert!(matches!(store.mark_detail_processed(detail.id).await, Ok(false)));
    }
}
