//! Idempotent reward settlement.
//!
//! Rewards move through `PENDING → PROCESSING → PROCESSED | FAILED`.
//! Creation refuses duplicates and enforces per-user daily limits. The
//! primary sweep drains PENDING rows, the retry sweep re-attempts FAILED
//! rows with retries left, and an operator may reprocess a single PENDING
//! row by hand.
//!
//! # Exactly-once crediting
//!
//! Two checks guard the `(user, subject, reward type)` key:
//!
//! 1. At creation the duplicate and daily-limit checks run under the
//!    reward table's write lock. This check is advisory: policies may
//!    change between creation and processing.
//! 2. Before crediting, the processing row reserves the key in the store.
//!    A key stays reserved once its row is PROCESSED, so a second row that
//!    slipped past creation loses here and is failed as superseded. This
//!    check is authoritative.
//!
//! Partial progress (ledger reference, badge marker, coupon code) is saved
//! on the row as each call succeeds; a retry skips what already happened.

mod crediting;
mod processor;

use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::collaborators::{CollaboratorError, Collaborators};
use crate::domain::{
    CreationOutcome, CreditPayload, EngineEvent, EventBus, EventId, ProcessOutcome,
    RewardCreditEvent, RewardEventId, RewardSubject, RewardType, SettlementSummary, SweepReport,
    UserId,
};
use crate::error::EngineError;
use crate::store::{ClaimMode, ContestStore, NewCreditEvent};

/// Sweep sizing and retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementSettings {
    /// Maximum rows loaded per sweep.
    pub batch_size: usize,
    /// Retry attempts before a FAILED row becomes terminal.
    pub max_retries: u32,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
        }
    }
}

/// Counters of one enqueue pass over a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EnqueueReport {
    /// PENDING rows created.
    pub queued: usize,
    /// Details with nothing to credit, marked processed directly.
    pub zero_reward: usize,
    /// Details already covered by a live row.
    pub duplicates: usize,
    /// Details refused by the daily limit.
    pub limited: usize,
}

/// The reward settlement pipeline.
#[derive(Debug, Clone)]
pub struct SettlementPipeline {
    store: Arc<ContestStore>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    settings: SettlementSettings,
}

impl SettlementPipeline {
    /// Creates a new `SettlementPipeline`.
    #[must_use]
    pub fn new(
        store: Arc<ContestStore>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
        settings: SettlementSettings,
    ) -> Self {
        Self {
            store,
            collaborators,
            clock,
            event_bus,
            settings,
        }
    }

    /// Returns the pipeline settings.
    #[must_use]
    pub const fn settings(&self) -> SettlementSettings {
        self.settings
    }

    /// Creates a PENDING reward row for `(user_id, subject, reward_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyNotFound`] if the reward type has no
    /// policy, [`EngineError::Transient`] if the policy store fails, and
    /// [`EngineError::Internal`] if the payload cannot be serialized.
    pub async fn create_credit_event(
        &self,
        user_id: UserId,
        subject: RewardSubject,
        reward_type: RewardType,
        payload: &CreditPayload,
    ) -> Result<CreationOutcome, EngineError> {
        let policy = self
            .collaborators
            .policy(reward_type)
            .await
            .map_err(|e| match e {
                CollaboratorError::NotFound(_) => EngineError::PolicyNotFound(reward_type),
                other => EngineError::Transient(other),
            })?;
        let context = serde_json::to_value(payload)
            .map_err(|e| EngineError::Internal(format!("credit payload: {e}")))?;

        let outcome = self
            .store
            .create_credit_event(
                NewCreditEvent {
                    user_id,
                    subject,
                    reward_type,
                    context,
                },
                policy.daily_limit,
                self.clock.today(),
                self.clock.now(),
            )
            .await;

        match outcome {
            CreationOutcome::Created(reward_event_id) => {
                let _ = self.event_bus.publish(EngineEvent::RewardQueued {
                    reward_event_id,
                    user_id,
                    reward_type,
                    timestamp: self.clock.now(),
                });
                tracing::info!(%reward_event_id, %user_id, %subject, %reward_type, "reward queued");
            }
            CreationOutcome::Duplicate(existing) => {
                tracing::debug!(
                    %user_id,
                    %subject,
                    %reward_type,
                    %existing,
                    "reward already queued"
                );
            }
            CreationOutcome::DailyLimitReached {
                limit,
                granted_today,
            } => {
                tracing::info!(
                    %user_id,
                    %reward_type,
                    limit,
                    granted_today,
                    "daily reward limit reached"
                );
            }
        }
        Ok(outcome)
    }

    /// Queues one `EVENT_REWARD` row per unprocessed placement with a
    /// reward. Placements with nothing to credit are marked processed
    /// directly.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ResultNotFound`] if the event has no result,
    /// plus the errors of [`Self::create_credit_event`].
    pub async fn enqueue_result_rewards(
        &self,
        event_id: EventId,
    ) -> Result<EnqueueReport, EngineError> {
        if self.store.result_for_event(event_id).await.is_none() {
            return Err(EngineError::ResultNotFound(event_id));
        }

        let mut report = EnqueueReport::default();
        for detail in self.store.details_for_event(event_id).await {
            if detail.reward_processed {
                continue;
            }
            if !detail.has_reward() {
                self.store.mark_detail_processed(detail.id).await?;
                report.zero_reward += 1;
                continue;
            }
            let payload = CreditPayload {
                points: Some(detail.points_earned),
                badge_points: detail.badge_points_earned,
                coupon: detail.coupon.clone(),
                result_detail_id: Some(detail.id),
                rank: Some(detail.rank),
                reason: format!("{event_id} rank {}", detail.rank),
            };
            let outcome = self
                .create_credit_event(
                    detail.user_id,
                    RewardSubject::Event(event_id),
                    RewardType::EventReward,
                    &payload,
                )
                .await?;
            match outcome {
                CreationOutcome::Created(_) => report.queued += 1,
                CreationOutcome::Duplicate(_) => report.duplicates += 1,
                CreationOutcome::DailyLimitReached { .. } => report.limited += 1,
            }
        }
        tracing::info!(
            %event_id,
            queued = report.queued,
            zero_reward = report.zero_reward,
            duplicates = report.duplicates,
            "result rewards enqueued"
        );
        Ok(report)
    }

    /// Primary sweep: processes up to `limit` PENDING rows, oldest first.
    pub async fn process_pending(&self, limit: usize) -> SweepReport {
        let ids = self.store.pending_batch(limit, None).await;
        self.sweep(ids, ClaimMode::Pending).await
    }

    /// Retry sweep: re-attempts up to `limit` FAILED rows that have retries
    /// left. Each claim counts one retry.
    pub async fn retry_failed(&self, limit: usize) -> SweepReport {
        let ids = self
            .store
            .retryable_batch(limit, self.settings.max_retries)
            .await;
        self.sweep(
            ids,
            ClaimMode::Retry {
                max_retries: self.settings.max_retries,
            },
        )
        .await
    }

    async fn sweep(&self, ids: Vec<RewardEventId>, mode: ClaimMode) -> SweepReport {
        let mut report = SweepReport {
            loaded: ids.len(),
            ..SweepReport::default()
        };
        for id in ids {
            let claimed = match self.store.claim_reward_event(id, mode, self.clock.now()).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(reward_event_id = %id, error = %e, "reward row skipped");
                    report.skipped += 1;
                    continue;
                }
            };
            report.claimed += 1;
            match self.process_claimed(claimed).await {
                ProcessOutcome::Processed { .. } => report.processed += 1,
                ProcessOutcome::Failed { .. } | ProcessOutcome::Superseded { .. } => {
                    report.failed += 1;
                }
            }
        }
        if report.loaded > 0 {
            tracing::info!(
                ?mode,
                loaded = report.loaded,
                processed = report.processed,
                failed = report.failed,
                skipped = report.skipped,
                "reward sweep finished"
            );
        }
        report
    }

    /// Processes one PENDING row on operator request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RewardEventNotFound`] for unknown ids and
    /// [`EngineError::Conflict`] if the row is not PENDING.
    pub async fn reprocess(&self, id: RewardEventId) -> Result<ProcessOutcome, EngineError> {
        let Some(claimed) = self
            .store
            .claim_reward_event(id, ClaimMode::Pending, self.clock.now())
            .await?
        else {
            let current = self.store.reward_event(id).await?;
            return Err(EngineError::Conflict(format!(
                "{id} is {}; only PENDING rows can be reprocessed",
                current.status
            )));
        };
        tracing::info!(reward_event_id = %id, "manual reprocess");
        Ok(self.process_claimed(claimed).await)
    }

    /// Queues the event's result rewards and processes the event's PENDING
    /// rows right away.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EventNotFound`] for unknown events plus the
    /// errors of [`Self::enqueue_result_rewards`].
    pub async fn settle_event(&self, event_id: EventId) -> Result<SettlementSummary, EngineError> {
        self.store.event(event_id).await?;
        self.enqueue_result_rewards(event_id).await?;

        let ids = self
            .store
            .pending_batch(usize::MAX, Some(RewardSubject::Event(event_id)))
            .await;
        let report = self.sweep(ids, ClaimMode::Pending).await;
        let summary = SettlementSummary {
            total: report.claimed,
            succeeded: report.processed,
            failed: report.failed,
        };
        tracing::info!(
            %event_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "event settled"
        );
        Ok(summary)
    }

    /// FAILED rows with no retry left, oldest first.
    pub async fn operator_queue(&self) -> Vec<RewardCreditEvent> {
        self.store.terminal_failures(self.settings.max_retries).await
    }
}
