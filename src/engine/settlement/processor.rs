use crate::domain::{EngineEvent, ProcessOutcome, RewardCreditEvent, RewardEventId};

use super::SettlementPipeline;

impl SettlementPipeline {
    /// Settles one row this caller has just claimed (status PROCESSING).
    pub(super) async fn process_claimed(&self, row: RewardCreditEvent) -> ProcessOutcome {
        let id = row.id;
        let key = row.key();

        if let Err(holder) = self.store.reserve_credit_key(key, id).await {
            let message = format!("{} already credited by {holder}", row.subject);
            self.fail(&row, message.clone(), Some(holder)).await;
            tracing::warn!(reward_event_id = %id, %holder, "duplicate reward superseded");
            return ProcessOutcome::Superseded { by: holder };
        }

        match self.apply_credit(&row).await {
            Ok(ledger_ref) => {
                let now = self.clock.now();
                if let Err(e) = self.store.mark_reward_processed(id, now).await {
                    tracing::error!(
                        reward_event_id = %id,
                        error = %e,
                        "could not mark reward processed"
                    );
                    return ProcessOutcome::Failed {
                        error: e.to_string(),
                        terminal: false,
                    };
                }
                let _ = self.event_bus.publish(EngineEvent::RewardProcessed {
                    reward_event_id: id,
                    user_id: row.user_id,
                    ledger_ref: ledger_ref.clone(),
                    timestamp: now,
                });
                tracing::info!(
                    reward_event_id = %id,
                    user_id = %row.user_id,
                    reward_type = %row.reward_type,
                    ledger_ref = ledger_ref.as_deref().unwrap_or("-"),
                    "reward processed"
                );
                ProcessOutcome::Processed { ledger_ref }
            }
            Err(e) => {
                // Rows with partial progress or an unanswered ledger call
                // keep their key reservation.
                let progressed = self
                    .store
                    .reward_event(id)
                    .await
                    .map(|r| r.ledger_in_doubt || r.ledger_ref.is_some() || r.badge_recorded)
                    .unwrap_or(true);
                if !progressed {
                    self.store.release_credit_key(key, id).await;
                }
                let terminal = self.fail(&row, e.to_string(), None).await;
                tracing::warn!(
                    reward_event_id = %id,
                    retry_count = row.retry_count,
                    terminal,
                    error = %e,
                    "reward failed"
                );
                ProcessOutcome::Failed {
                    error: e.to_string(),
                    terminal,
                }
            }
        }
    }

    /// Moves the row to FAILED and reports whether it is now terminal.
    async fn fail(
        &self,
        row: &RewardCreditEvent,
        message: String,
        superseded_by: Option<RewardEventId>,
    ) -> bool {
        let now = self.clock.now();
        let terminal =
            superseded_by.is_some() || row.retry_count >= self.settings.max_retries;
        if let Err(e) = self
            .store
            .mark_reward_failed(row.id, message.clone(), superseded_by, now)
            .await
        {
            tracing::error!(reward_event_id = %row.id, error = %e, "could not mark reward failed");
        }
        let _ = self.event_bus.publish(EngineEvent::RewardFailed {
            reward_event_id: row.id,
            user_id: row.user_id,
            error: message,
            retry_count: row.retry_count,
            terminal,
            timestamp: now,
        });
        terminal
    }
}
