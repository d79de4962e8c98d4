//! Reward credit rows, their indexes and the credit-key reservations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{ContestStore, next_id};
use crate::domain::{
    CreationOutcome, CreditKey, RewardCreditEvent, RewardEventId, RewardStatus, RewardSubject,
    RewardType, UserId,
};
use crate::error::EngineError;

type Row = Arc<RwLock<RewardCreditEvent>>;

#[derive(Debug, Default)]
pub(super) struct CreditRows {
    rows: BTreeMap<RewardEventId, Row>,
    by_key: HashMap<CreditKey, Vec<RewardEventId>>,
    by_user_type: HashMap<(UserId, RewardType), Vec<RewardEventId>>,
}

impl CreditRows {
    fn rows_for<'a>(
        &'a self,
        ids: Option<&'a Vec<RewardEventId>>,
    ) -> impl Iterator<Item = (RewardEventId, &'a Row)> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id).map(|row| (*id, row)))
    }
}

/// Reward credit row to create.
#[derive(Debug, Clone)]
pub struct NewCreditEvent {
    /// Rewarded user.
    pub user_id: UserId,
    /// Rewarded subject.
    pub subject: RewardSubject,
    /// Reward kind.
    pub reward_type: RewardType,
    /// Serialized credit payload.
    pub context: serde_json::Value,
}

/// Which rows a sweep may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimMode {
    /// PENDING rows (primary sweep and manual reprocess).
    Pending,
    /// FAILED rows with retries left; claiming counts one retry.
    Retry {
        /// Retry ceiling.
        max_retries: u32,
    },
}

impl ContestStore {
    /// Creates a PENDING row unless a live row already covers the key or
    /// the user reached the daily limit. Both checks and the insert happen
    /// under the table write lock, so concurrent creations for one key
    /// yield a single row.
    pub async fn create_credit_event(
        &self,
        new: NewCreditEvent,
        daily_limit: Option<u32>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> CreationOutcome {
        let key = CreditKey {
            user_id: new.user_id,
            subject: new.subject,
            reward_type: new.reward_type,
        };
        let mut credits = self.credits.write().await;

        for (id, row) in credits.rows_for(credits.by_key.get(&key)) {
            if row.read().await.blocks_duplicates() {
                return CreationOutcome::Duplicate(id);
            }
        }

        if let Some(limit) = daily_limit {
            let mut granted_today: u32 = 0;
            let same_type = credits.by_user_type.get(&(new.user_id, new.reward_type));
            for (_, row) in credits.rows_for(same_type) {
                let row = row.read().await;
                if row.created_on == today && row.status != RewardStatus::Failed {
                    granted_today = granted_today.saturating_add(1);
                }
            }
            if granted_today >= limit {
                return CreationOutcome::DailyLimitReached {
                    limit,
                    granted_today,
                };
            }
        }

        let id = RewardEventId::new(next_id(&self.sequences.reward));
        let row = RewardCreditEvent {
            id,
            user_id: new.user_id,
            subject: new.subject,
            reward_type: new.reward_type,
            status: RewardStatus::Pending,
            retry_count: 0,
            context: new.context,
            error_message: None,
            ledger_ref: None,
            ledger_in_doubt: false,
            badge_recorded: false,
            coupon_code: None,
            superseded_by: None,
            created_at: now,
            created_on: today,
            updated_at: now,
            processed_at: None,
        };
        credits.rows.insert(id, Arc::new(RwLock::new(row)));
        credits.by_key.entry(key).or_default().push(id);
        credits
            .by_user_type
            .entry((new.user_id, new.reward_type))
            .or_default()
            .push(id);
        CreationOutcome::Created(id)
    }

    async fn reward_row(&self, id: RewardEventId) -> Result<Row, EngineError> {
        self.credits
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(EngineError::RewardEventNotFound(id))
    }

    /// Returns a snapshot of a reward row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RewardEventNotFound`] if absent.
    pub async fn reward_event(&self, id: RewardEventId) -> Result<RewardCreditEvent, EngineError> {
        let row = self.reward_row(id).await?;
        let snapshot = row.read().await.clone();
        Ok(snapshot)
    }

    async fn reward_snapshots(&self) -> Vec<RewardCreditEvent> {
        let rows: Vec<Row> = self.credits.read().await.rows.values().map(Arc::clone).collect();
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(row.read().await.clone());
        }
        snapshots
    }

    /// Returns snapshots of every row matching `filter`, oldest first.
    pub async fn reward_events_where<F>(&self, filter: F) -> Vec<RewardCreditEvent>
    where
        F: Fn(&RewardCreditEvent) -> bool,
    {
        let mut rows: Vec<RewardCreditEvent> = self
            .reward_snapshots()
            .await
            .into_iter()
            .filter(|row| filter(row))
            .collect();
        rows.sort_by_key(|row| (row.created_at, row.id));
        rows
    }

    /// Ids of PENDING rows, oldest first, at most `limit`. When `subject`
    /// is given only rows for that subject are returned.
    pub async fn pending_batch(
        &self,
        limit: usize,
        subject: Option<RewardSubject>,
    ) -> Vec<RewardEventId> {
        self.reward_events_where(|row| {
            row.status == RewardStatus::Pending && subject.is_none_or(|s| row.subject == s)
        })
        .await
        .into_iter()
        .take(limit)
        .map(|row| row.id)
        .collect()
    }

    /// Ids of FAILED rows that still have retries left, oldest first, at
    /// most `limit`.
    pub async fn retryable_batch(&self, limit: usize, max_retries: u32) -> Vec<RewardEventId> {
        self.reward_events_where(|row| row.is_retryable(max_retries))
            .await
            .into_iter()
            .take(limit)
            .map(|row| row.id)
            .collect()
    }

    /// FAILED rows with no retry left, superseded duplicates excluded: the
    /// operator queue.
    pub async fn terminal_failures(&self, max_retries: u32) -> Vec<RewardCreditEvent> {
        self.reward_events_where(|row| {
            row.status == RewardStatus::Failed
                && row.superseded_by.is_none()
                && row.retry_count >= max_retries
        })
        .await
    }

    /// Transitions a row to PROCESSING if it is claimable under `mode`.
    /// Returns `None` when another sweep got there first or the row is not
    /// in a claimable state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RewardEventNotFound`] if absent.
    pub async fn claim_reward_event(
        &self,
        id: RewardEventId,
        mode: ClaimMode,
        now: DateTime<Utc>,
    ) -> Result<Option<RewardCreditEvent>, EngineError> {
        let row = self.reward_row(id).await?;
        let mut row = row.write().await;
        let claimable = match mode {
            ClaimMode::Pending => row.status == RewardStatus::Pending,
            ClaimMode::Retry { max_retries } => row.is_retryable(max_retries),
        };
        if !claimable {
            return Ok(None);
        }
        if matches!(mode, ClaimMode::Retry { .. }) {
            row.retry_count = row.retry_count.saturating_add(1);
        }
        row.status = RewardStatus::Processing;
        row.updated_at = now;
        Ok(Some(row.clone()))
    }

    async fn mutate_processing<F>(
        &self,
        id: RewardEventId,
        apply: F,
    ) -> Result<RewardCreditEvent, EngineError>
    where
        F: FnOnce(&mut RewardCreditEvent),
    {
        let row = self.reward_row(id).await?;
        let mut row = row.write().await;
        if row.status != RewardStatus::Processing {
            return Err(EngineError::Consistency(format!(
                "{id} is {} and cannot be updated by a sweep",
                row.status
            )));
        }
        apply(&mut row);
        Ok(row.clone())
    }

    /// Flags or clears an unanswered ledger call.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is absent or not PROCESSING.
    pub async fn set_ledger_in_doubt(
        &self,
        id: RewardEventId,
        in_doubt: bool,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.mutate_processing(id, |row| {
            row.ledger_in_doubt = in_doubt;
            row.updated_at = now;
        })
        .await
        .map(|_| ())
    }

    /// Stores the ledger reference as soon as points are credited.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is absent or not PROCESSING.
    pub async fn record_ledger_ref(
        &self,
        id: RewardEventId,
        reference: String,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.mutate_processing(id, |row| {
            row.ledger_ref = Some(reference);
            row.ledger_in_doubt = false;
            row.updated_at = now;
        })
        .await
        .map(|_| ())
    }

    /// Marks the badge activity as recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is absent or not PROCESSING.
    pub async fn record_badge_activity(
        &self,
        id: RewardEventId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.mutate_processing(id, |row| {
            row.badge_recorded = true;
            row.updated_at = now;
        })
        .await
        .map(|_| ())
    }

    /// Stores the issued coupon code.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is absent or not PROCESSING.
    pub async fn record_coupon_code(
        &self,
        id: RewardEventId,
        code: String,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.mutate_processing(id, |row| {
            row.coupon_code = Some(code);
            row.updated_at = now;
        })
        .await
        .map(|_| ())
    }

    /// PROCESSING → PROCESSED.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is absent or not PROCESSING.
    pub async fn mark_reward_processed(
        &self,
        id: RewardEventId,
        now: DateTime<Utc>,
    ) -> Result<RewardCreditEvent, EngineError> {
        self.mutate_processing(id, |row| {
            row.status = RewardStatus::Processed;
            row.error_message = None;
            row.processed_at = Some(now);
            row.updated_at = now;
        })
        .await
    }

    /// PROCESSING → FAILED. The retry count is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is absent or not PROCESSING.
    pub async fn mark_reward_failed(
        &self,
        id: RewardEventId,
        message: String,
        superseded_by: Option<RewardEventId>,
        now: DateTime<Utc>,
    ) -> Result<RewardCreditEvent, EngineError> {
        self.mutate_processing(id, |row| {
            row.status = RewardStatus::Failed;
            row.error_message = Some(message);
            row.superseded_by = superseded_by;
            row.updated_at = now;
        })
        .await
    }

    /// Reserves `key` for row `id`. Succeeds if the key is free or already
    /// held by `id`; otherwise returns the holder.
    ///
    /// # Errors
    ///
    /// Returns the id of the row that holds the key.
    pub async fn reserve_credit_key(
        &self,
        key: CreditKey,
        id: RewardEventId,
    ) -> Result<(), RewardEventId> {
        let mut keys = self.credit_keys.lock().await;
        match keys.get(&key) {
            Some(holder) if *holder != id => Err(*holder),
            _ => {
                keys.insert(key, id);
                Ok(())
            }
        }
    }

    /// Releases `key` if `id` holds it.
    pub async fn release_credit_key(&self, key: CreditKey, id: RewardEventId) {
        let mut keys = self.credit_keys.lock().await;
        if keys.get(&key) == Some(&id) {
            keys.remove(&key);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::EventId;

    fn today() -> NaiveDate {
        let Some(date) = NaiveDate::from_ymd_opt(2025, 8, 15) else {
            panic!("valid date");
        };
        date
    }

    fn new_credit(user: i64, event: i64) -> NewCreditEvent {
        NewCreditEvent {
            user_id: UserId::new(user),
            subject: RewardSubject::Event(EventId::new(event)),
            reward_type: RewardType::EventParticipation,
            context: serde_json::json!({ "reason": "joined" }),
        }
    }

    #[tokio::test]
    async fn live_row_blocks_duplicate_creation() {
        let store = ContestStore::new();
        let first = store.create_credit_event(new_credit(1, 1), None, today(), Utc::now()).await;
        let Some(first_id) = first.created() else {
            panic!("expected creation");
        };
        let second = store.create_credit_event(new_credit(1, 1), None, today(), Utc::now()).await;
        assert_eq!(second, CreationOutcome::Duplicate(first_id));
    }

    #[tokio::test]
    async fn failed_row_does_not_block_new_row() {
        let store = ContestStore::new();
        let Some(id) = store
            .create_credit_event(new_credit(1, 1), None, today(), Utc::now())
            .await
            .created()
        else {
            panic!("expected creation");
        };
        assert!(matches!(
            store.claim_reward_event(id, ClaimMode::Pending, Utc::now()).await,
            Ok(Some(_))
        ));
        assert!(store.mark_reward_failed(id, "x".to_string(), None, Utc::now()).await.is_ok());
        let again = store.create_credit_event(new_credit(1, 1), None, today(), Utc::now()).await;
        assert!(again.created().is_some());
    }

    #[tokio::test]
    async fn daily_limit_counts_rows_created_today() {
        let store = ContestStore::new();
        let first = store.create_credit_event(new_credit(1, 1), Some(1), today(), Utc::now()).await;
        assert!(first.created().is_some());
        let second = store
            .create_credit_event(new_credit(1, 2), Some(1), today(), Utc::now())
            .await;
        assert_eq!(
            second,
            CreationOutcome::DailyLimitReached {
                limit: 1,
                granted_today: 1
            }
        );
        let Some(tomorrow) = today().succ_opt() else {
            panic!("valid date");
        };
        let next_day = store
            .create_credit_event(new_credit(1, 2), Some(1), tomorrow, Utc::now())
            .await;
        assert!(next_day.created().is_some());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = ContestStore::new();
        let Some(id) = store
            .create_credit_event(new_credit(1, 1), None, today(), Utc::now())
            .await
            .created()
        else {
            panic!("expected creation");
        };
        let first = store.claim_reward_event(id, ClaimMode::Pending, Utc::now()).await;
        assert!(matches!(first, Ok(Some(_))));
        let second = store.claim_reward_event(id, ClaimMode::Pending, Utc::now()).await;
        assert!(matches!(second, Ok(None)));
        assert!(store.pending_batch(10, None).await.is_empty());
    }

    #[tokio::test]
    async fn retry_claim_counts_attempts() {
        let store = ContestStore::new();
        let Some(id) = store
            .create_credit_event(new_credit(1, 1), None, today(), Utc::now())
            .await
            .created()
        else {
            panic!("expected creation");
        };
        let _ = store.claim_reward_event(id, ClaimMode::Pending, Utc::now()).await;
        let _ = store.mark_reward_failed(id, "down".to_string(), None, Utc::now()).await;
        let retry = ClaimMode::Retry { max_retries: 1 };
        let Ok(Some(claimed)) = store.claim_reward_event(id, retry, Utc::now()).await else {
            panic!("expected retry claim");
        };
        assert_eq!(claimed.retry_count, 1);
        let _ = store.mark_reward_failed(id, "down".to_string(), None, Utc::now()).await;
        assert!(matches!(store.claim_reward_event(id, retry, Utc::now()).await, Ok(None)));
        assert_eq!(store.terminal_failures(1).await.len(), 1);
    }

    #[tokio::test]
    async fn key_reservation_has_single_holder() {
        let store = ContestStore::new();
        let key = CreditKey {
            user_id: UserId::new(1),
            subject: RewardSubject::Event(EventId::new(1)),
            reward_type: RewardType::EventReward,
        };
        assert_eq!(store.reserve_credit_key(key, RewardEventId::new(1)).await, Ok(()));
        assert_eq!(store.reserve_credit_key(key, RewardEventId::new(1)).await, Ok(()));
        assert_eq!(
            store.reserve_credit_key(key, RewardEventId::new(2)).await,
            Err(RewardEventId::new(1))
        );
        store.release_credit_key(key, RewardEventId::new(2)).await;
        assert!(store.reserve_credit_key(key, RewardEventId::new(2)).await.is_err());
        store.release_credit_key(key, RewardEventId::new(1)).await;
        assert_eq!(store.reserve_credit_key(key, RewardEventId::new(2)).await, Ok(()));
    }
}
