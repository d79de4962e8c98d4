//! Narrow interfaces to the systems the engine does not own.
//!
//! Users, content, the point ledger, badge activity, coupon issuance and
//! reward policies live outside the engine. Each is reached through a
//! small synchronous trait; async callers go through [`call_blocking`],
//! which runs the call on the blocking pool and bounds it with a timeout
//! so a hung collaborator fails one item instead of stalling a sweep.

pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DiscountType, EventId, RewardPolicy, RewardType, Submission, UserId};

/// Failure reported by (or while calling) a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// The collaborator has no such record.
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The collaborator could not be reached or failed internally.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish in time.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        /// Operation name.
        operation: &'static str,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
}

/// User account as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Contact email; coupons are issued to it.
    pub email: String,
    /// Display name.
    pub nickname: String,
}

/// Ledger acknowledgement of a point credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Ledger-side reference of the credit.
    pub reference: String,
    /// Balance after the credit.
    pub balance_after: i64,
}

/// Coupon issuance request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRequest {
    /// Recipient email.
    pub user_email: String,
    /// Coupon code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Discount kind.
    pub discount_type: DiscountType,
    /// Discount value.
    pub discount_value: i64,
    /// Whether shipping is waived.
    pub free_shipping: bool,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// Issued coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    /// Issued code.
    pub code: String,
    /// Recipient email.
    pub user_email: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

/// User account lookup.
pub trait UserDirectory: Send + Sync + fmt::Debug {
    /// Returns the user or [`CollaboratorError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the user is unknown or the directory fails.
    fn get(&self, user_id: UserId) -> Result<User, CollaboratorError>;
}

/// Legacy and live user content.
pub trait ContentStore: Send + Sync + fmt::Debug {
    /// Returns every submission posted under `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the store fails.
    fn find_by_event(&self, event_id: EventId) -> Result<Vec<Submission>, CollaboratorError>;
}

/// Point ledger.
pub trait PointLedger: Send + Sync + fmt::Debug {
    /// Credits `amount` points to `user_id`.
    ///
    /// `idempotency_key` identifies the credit. A ledger that already
    /// accepted the key returns the original receipt and credits nothing,
    /// so a call whose answer was lost can be repeated safely.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the credit is refused or fails.
    fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        subject_id: i64,
        idempotency_key: &str,
    ) -> Result<Receipt, CollaboratorError>;
}

/// Badge activity log.
pub trait BadgeActivityLog: Send + Sync + fmt::Debug {
    /// Records one activity towards the user's badges. A repeated
    /// `idempotency_key` is acknowledged without a second record.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the log fails.
    fn record(
        &self,
        user_id: UserId,
        activity_type: &str,
        reason: &str,
        subject_id: i64,
        subject_type: &str,
        idempotency_key: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Coupon issuance.
pub trait CouponIssuer: Send + Sync + fmt::Debug {
    /// Issues a coupon.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if issuance fails.
    fn issue(&self, request: &CouponRequest) -> Result<Coupon, CollaboratorError>;
}

/// Reward policy lookup.
pub trait RewardPolicyStore: Send + Sync + fmt::Debug {
    /// Returns the policy for `reward_type`.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::NotFound`] if no policy is configured.
    fn get(&self, reward_type: RewardType) -> Result<RewardPolicy, CollaboratorError>;
}

/// Every collaborator the engine talks to, plus the caller-side timeout.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// User directory.
    pub users: Arc<dyn UserDirectory>,
    /// Content store.
    pub content: Arc<dyn ContentStore>,
    /// Point ledger.
    pub ledger: Arc<dyn PointLedger>,
    /// Badge activity log.
    pub badges: Arc<dyn BadgeActivityLog>,
    /// Coupon issuer.
    pub coupons: Arc<dyn CouponIssuer>,
    /// Reward policies.
    pub policies: Arc<dyn RewardPolicyStore>,
    /// Upper bound for a single collaborator call.
    pub call_timeout: Duration,
}

impl Collaborators {
    /// Looks up a user on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] on lookup failure or timeout.
    pub async fn user(&self, user_id: UserId) -> Result<User, CollaboratorError> {
        let users = Arc::clone(&self.users);
        call_blocking(self.call_timeout, "user_directory.get", move || {
            users.get(user_id)
        })
        .await
    }

    /// Looks up a reward policy on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] on lookup failure or timeout.
    pub async fn policy(&self, reward_type: RewardType) -> Result<RewardPolicy, CollaboratorError> {
        let policies = Arc::clone(&self.policies);
        call_blocking(self.call_timeout, "reward_policy.get", move || {
            policies.get(reward_type)
        })
        .await
    }

    /// Loads the submissions of an event on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] on store failure or timeout.
    pub async fn submissions(
        &self,
        event_id: EventId,
    ) -> Result<Vec<Submission>, CollaboratorError> {
        let content = Arc::clone(&self.content);
        call_blocking(self.call_timeout, "content_store.find_by_event", move || {
            content.find_by_event(event_id)
        })
        .await
    }
}

/// Runs a synchronous collaborator call on the blocking pool, bounded by
/// `timeout`.
///
/// The blocking task is not cancelled on timeout; its eventual result is
/// discarded. A timed-out call may still have taken effect.
///
/// # Errors
///
/// Returns the call's own error, [`CollaboratorError::Timeout`] when the
/// deadline passes, or [`CollaboratorError::Unavailable`] if the task
/// panicked.
pub async fn call_blocking<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: FnOnce() -> Result<T, CollaboratorError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(call)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(CollaboratorError::Unavailable(format!(
            "{operation} task failed: {join_err}"
        ))),
        Err(_) => Err(CollaboratorError::Timeout {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_blocking_returns_value() {
        let result = call_blocking(Duration::from_secs(1), "test.ok", || Ok(41 + 1)).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn call_blocking_propagates_error() {
        let result: Result<(), _> = call_blocking(Duration::from_secs(1), "test.err", || {
            Err(CollaboratorError::Rejected("nope".to_string()))
        })
        .await;
        assert_eq!(result, Err(CollaboratorError::Rejected("nope".to_string())));
    }

    #[tokio::test]
    async fn call_blocking_times_out() {
        let result: Result<(), _> = call_blocking(Duration::from_millis(20), "test.slow", || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await;
        assert!(matches!(
            result,
            Err(CollaboratorError::Timeout {
                operation: "test.slow",
                timeout_ms: 20
            })
        ));
    }
}
