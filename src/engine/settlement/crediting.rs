use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::SettlementPipeline;
use crate::collaborators::{CollaboratorError, CouponRequest, call_blocking};
use crate::domain::{CreditPayload, RewardCreditEvent};
use crate::error::EngineError;

/// Coupon code for a placement reward. Deterministic, so a retry asks for
/// the same code and the issuer rejects a second copy.
fn coupon_code(row: &RewardCreditEvent, payload: &CreditPayload) -> String {
    format!(
        "EVT{}-U{}-R{}",
        row.subject.raw_id(),
        row.user_id.get(),
        payload.rank.unwrap_or(0)
    )
}

impl SettlementPipeline {
    /// Performs the external calls for one claimed row and returns the
    /// ledger reference, if points were credited.
    ///
    /// Order: validate user and policy, credit points, record badge
    /// activity, issue coupon, mark the placement processed. Each step's
    /// result is saved on the row before the next one starts. Ledger and
    /// badge calls carry the row's credit key, so repeating a call whose
    /// answer was lost cannot credit twice. Coupon failures are logged and
    /// do not fail the row.
    pub(super) async fn apply_credit(
        &self,
        row: &RewardCreditEvent,
    ) -> Result<Option<String>, EngineError> {
        let id = row.id;
        let user_id = row.user_id;
        let reward_type = row.reward_type;

        let user = self.collaborators.user(user_id).await.map_err(|e| match e {
            CollaboratorError::NotFound(_) => EngineError::UserNotFound(user_id),
            other => EngineError::Transient(other),
        })?;
        let policy = self
            .collaborators
            .policy(reward_type)
            .await
            .map_err(|e| match e {
                CollaboratorError::NotFound(_) => EngineError::PolicyNotFound(reward_type),
                other => EngineError::Transient(other),
            })?;
        let payload: CreditPayload = serde_json::from_value(row.context.clone())
            .map_err(|e| EngineError::Internal(format!("{id} has an unreadable payload: {e}")))?;

        let timeout = self.collaborators.call_timeout;
        let subject_id = row.subject.raw_id();
        let amount = payload.points.unwrap_or(policy.points);
        let credit_key = row.key().to_string();

        let mut ledger_ref = row.ledger_ref.clone();
        if ledger_ref.is_none() && amount > 0 {
            if row.ledger_in_doubt {
                tracing::info!(
                    reward_event_id = %id,
                    key = %credit_key,
                    "previous ledger call unanswered; repeating with the same key"
                );
            } else {
                self.store.set_ledger_in_doubt(id, true, self.clock.now()).await?;
            }
            let ledger = Arc::clone(&self.collaborators.ledger);
            let reason = payload.reason.clone();
            let key = credit_key.clone();
            let receipt = match call_blocking(timeout, "point_ledger.credit", move || {
                ledger.credit(user_id, amount, &reason, subject_id, &key)
            })
            .await
            {
                Ok(receipt) => receipt,
                Err(e @ CollaboratorError::Timeout { .. }) => return Err(e.into()),
                Err(e) => {
                    // The ledger answered, so nothing was credited.
                    self.store.set_ledger_in_doubt(id, false, self.clock.now()).await?;
                    return Err(e.into());
                }
            };
            self.store
                .record_ledger_ref(id, receipt.reference.clone(), self.clock.now())
                .await?;
            tracing::debug!(
                reward_event_id = %id,
                amount,
                reference = %receipt.reference,
                "points credited"
            );
            ledger_ref = Some(receipt.reference);
        }

        if !row.badge_recorded {
            let badges = Arc::clone(&self.collaborators.badges);
            let reason = payload.reason.clone();
            let subject_type = row.subject.subject_type();
            let key = credit_key.clone();
            call_blocking(timeout, "badge_activity.record", move || {
                badges.record(
                    user_id,
                    reward_type.badge_activity(),
                    &reason,
                    subject_id,
                    subject_type,
                    &key,
                )
            })
            .await?;
            self.store.record_badge_activity(id, self.clock.now()).await?;
        }

        if let Some(spec) = payload.coupon.as_ref().filter(|_| row.coupon_code.is_none()) {
            let request = CouponRequest {
                user_email: user.email.clone(),
                code: coupon_code(row, &payload),
                name: spec.name.clone(),
                discount_type: spec.discount_type,
                discount_value: spec.discount_value,
                free_shipping: spec.free_shipping,
                expires_at: self
                    .clock
                    .now()
                    .checked_add_signed(Duration::days(i64::from(spec.valid_days)))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            };
            let coupons = Arc::clone(&self.collaborators.coupons);
            match call_blocking(timeout, "coupon_issuer.issue", move || coupons.issue(&request))
                .await
            {
                Ok(coupon) => {
                    self.store
                        .record_coupon_code(id, coupon.code, self.clock.now())
                        .await?;
                }
                Err(e) => {
                    tracing::warn!(
                        reward_event_id = %id,
                        %user_id,
                        error = %e,
                        "coupon issuance failed"
                    );
                }
            }
        }

        if let Some(detail_id) = payload.result_detail_id {
            match self.store.mark_detail_processed(detail_id).await {
                Ok(_) => {}
                Err(EngineError::Consistency(reason)) => {
                    tracing::warn!(
                        reward_event_id = %id,
                        %reason,
                        "placement replaced before settlement"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ledger_ref)
    }
}
