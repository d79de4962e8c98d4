//! In-process collaborator implementations.
//!
//! Used by the binary when it runs standalone and by tests. Each keeps its
//! state behind a `std::sync::Mutex`; calls are short and never held across
//! an await point.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    BadgeActivityLog, CollaboratorError, Collaborators, ContentStore, Coupon, CouponIssuer,
    CouponRequest, PointLedger, Receipt, RewardPolicyStore, User, UserDirectory,
};
use crate::domain::{EventId, RewardPolicy, RewardType, Submission, UserId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// User directory backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<UserId, User>>,
}

impl InMemoryUserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, user: User) {
        lock(&self.users).insert(user.id, user);
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn get(&self, user_id: UserId) -> Result<User, CollaboratorError> {
        lock(&self.users)
            .get(&user_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(user_id.to_string()))
    }
}

/// Content store backed by a list of submissions.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    submissions: Mutex<Vec<Submission>>,
}

impl InMemoryContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a submission.
    pub fn insert(&self, submission: Submission) {
        lock(&self.submissions).push(submission);
    }
}

impl ContentStore for InMemoryContentStore {
    fn find_by_event(&self, event_id: EventId) -> Result<Vec<Submission>, CollaboratorError> {
        Ok(lock(&self.submissions)
            .iter()
            .filter(|s| s.event_id == Some(event_id))
            .cloned()
            .collect())
    }
}

/// One credit accepted by [`InMemoryPointLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Credited user.
    pub user_id: UserId,
    /// Amount.
    pub amount: i64,
    /// Reason text.
    pub reason: String,
    /// Subject identifier.
    pub subject_id: i64,
    /// Issued reference.
    pub reference: String,
    /// Caller-supplied idempotency key.
    pub idempotency_key: String,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    receipts: HashMap<String, Receipt>,
    balances: HashMap<UserId, i64>,
    failures_remaining: u32,
    latency: Option<Duration>,
}

/// Point ledger that records every credit.
#[derive(Debug, Default)]
pub struct InMemoryPointLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryPointLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` credits fail with [`CollaboratorError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        lock(&self.state).failures_remaining = count;
    }

    /// Delays every credit by `latency` before answering.
    pub fn set_latency(&self, latency: Option<Duration>) {
        lock(&self.state).latency = latency;
    }

    /// Returns a copy of every accepted credit.
    #[must_use]
    pub fn entries(&self) -> Vec<LedgerEntry> {
        lock(&self.state).entries.clone()
    }

    /// Current balance of `user_id`.
    #[must_use]
    pub fn balance(&self, user_id: UserId) -> i64 {
        lock(&self.state).balances.get(&user_id).copied().unwrap_or(0)
    }
}

impl PointLedger for InMemoryPointLedger {
    fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: &str,
        subject_id: i64,
        idempotency_key: &str,
    ) -> Result<Receipt, CollaboratorError> {
        let latency = lock(&self.state).latency;
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        let mut state = lock(&self.state);
        if let Some(receipt) = state.receipts.get(idempotency_key) {
            return Ok(receipt.clone());
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CollaboratorError::Unavailable("ledger offline".to_string()));
        }
        if amount <= 0 {
            return Err(CollaboratorError::Rejected(format!(
                "amount must be positive, got {amount}"
            )));
        }
        let reference = format!("pt-{}", state.entries.len() + 1);
        let balance = state.balances.entry(user_id).or_insert(0);
        *balance = balance.saturating_add(amount);
        let balance_after = *balance;
        state.entries.push(LedgerEntry {
            user_id,
            amount,
            reason: reason.to_string(),
            subject_id,
            reference: reference.clone(),
            idempotency_key: idempotency_key.to_string(),
        });
        let receipt = Receipt {
            reference,
            balance_after,
        };
        state
            .receipts
            .insert(idempotency_key.to_string(), receipt.clone());
        Ok(receipt)
    }
}

/// One activity accepted by [`InMemoryBadgeLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeEntry {
    /// User.
    pub user_id: UserId,
    /// Activity type.
    pub activity_type: String,
    /// Subject identifier.
    pub subject_id: i64,
    /// Subject type.
    pub subject_type: String,
}

#[derive(Debug, Default)]
struct BadgeState {
    entries: Vec<BadgeEntry>,
    seen: HashSet<String>,
    failures_remaining: u32,
}

/// Badge activity log that records every activity.
#[derive(Debug, Default)]
pub struct InMemoryBadgeLog {
    state: Mutex<BadgeState>,
}

impl InMemoryBadgeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` records fail.
    pub fn fail_next(&self, count: u32) {
        lock(&self.state).failures_remaining = count;
    }

    /// Returns a copy of every recorded activity.
    #[must_use]
    pub fn entries(&self) -> Vec<BadgeEntry> {
        lock(&self.state).entries.clone()
    }
}

impl BadgeActivityLog for InMemoryBadgeLog {
    fn record(
        &self,
        user_id: UserId,
        activity_type: &str,
        _reason: &str,
        subject_id: i64,
        subject_type: &str,
        idempotency_key: &str,
    ) -> Result<(), CollaboratorError> {
        let mut state = lock(&self.state);
        if state.seen.contains(idempotency_key) {
            return Ok(());
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(CollaboratorError::Unavailable("badge log offline".to_string()));
        }
        state.seen.insert(idempotency_key.to_string());
        state.entries.push(BadgeEntry {
            user_id,
            activity_type: activity_type.to_string(),
            subject_id,
            subject_type: subject_type.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CouponState {
    issued: Vec<Coupon>,
    failure: Option<String>,
}

/// Coupon issuer that records issued coupons and rejects duplicate codes.
#[derive(Debug, Default)]
pub struct InMemoryCouponIssuer {
    state: Mutex<CouponState>,
}

impl InMemoryCouponIssuer {
    /// Creates an issuer that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every issuance fail with `message` until cleared with `None`.
    pub fn set_failure(&self, message: Option<String>) {
        lock(&self.state).failure = message;
    }

    /// Returns a copy of every issued coupon.
    #[must_use]
    pub fn issued(&self) -> Vec<Coupon> {
        lock(&self.state).issued.clone()
    }
}

impl CouponIssuer for InMemoryCouponIssuer {
    fn issue(&self, request: &CouponRequest) -> Result<Coupon, CollaboratorError> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.failure {
            return Err(CollaboratorError::Unavailable(message.clone()));
        }
        if state.issued.iter().any(|c| c.code == request.code) {
            return Err(CollaboratorError::Rejected(format!(
                "coupon code {} already issued",
                request.code
            )));
        }
        let coupon = Coupon {
            code: request.code.clone(),
            user_email: request.user_email.clone(),
            expires_at: request.expires_at,
        };
        state.issued.push(coupon.clone());
        Ok(coupon)
    }
}

/// Policy store backed by a map.
#[derive(Debug, Default)]
pub struct StaticPolicyStore {
    policies: Mutex<HashMap<RewardType, RewardPolicy>>,
}

impl StaticPolicyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the stock policies: placement rewards carry
    /// their own amounts, participation pays 100 points once a day and
    /// votes pay 10 points up to ten times a day per type.
    #[must_use]
    pub fn with_defaults() -> Self {
        let store = Self::new();
        store.insert(RewardPolicy {
            reward_type: RewardType::EventReward,
            points: 0,
            daily_limit: None,
        });
        store.insert(RewardPolicy {
            reward_type: RewardType::EventParticipation,
            points: 100,
            daily_limit: Some(1),
        });
        store.insert(RewardPolicy {
            reward_type: RewardType::BattleVote,
            points: 10,
            daily_limit: Some(10),
        });
        store.insert(RewardPolicy {
            reward_type: RewardType::RankingVote,
            points: 10,
            daily_limit: Some(10),
        });
        store
    }

    /// Adds or replaces a policy.
    pub fn insert(&self, policy: RewardPolicy) {
        lock(&self.policies).insert(policy.reward_type, policy);
    }

    /// Removes the policy for `reward_type`.
    pub fn remove(&self, reward_type: RewardType) {
        lock(&self.policies).remove(&reward_type);
    }
}

impl RewardPolicyStore for StaticPolicyStore {
    fn get(&self, reward_type: RewardType) -> Result<RewardPolicy, CollaboratorError> {
        lock(&self.policies)
            .get(&reward_type)
            .cloned()
            .ok_or_else(|| CollaboratorError::NotFound(format!("policy {reward_type}")))
    }
}

/// One in-memory instance of every collaborator, kept as concrete types so
/// callers can seed and inspect them.
#[derive(Debug, Clone)]
pub struct MemoryBackends {
    /// User directory.
    pub users: Arc<InMemoryUserDirectory>,
    /// Content store.
    pub content: Arc<InMemoryContentStore>,
    /// Point ledger.
    pub ledger: Arc<InMemoryPointLedger>,
    /// Badge activity log.
    pub badges: Arc<InMemoryBadgeLog>,
    /// Coupon issuer.
    pub coupons: Arc<InMemoryCouponIssuer>,
    /// Reward policies, preloaded with the stock set.
    pub policies: Arc<StaticPolicyStore>,
}

impl Default for MemoryBackends {
    fn default() -> Self {
        Self {
            users: Arc::new(InMemoryUserDirectory::new()),
            content: Arc::new(InMemoryContentStore::new()),
            ledger: Arc::new(InMemoryPointLedger::new()),
            badges: Arc::new(InMemoryBadgeLog::new()),
            coupons: Arc::new(InMemoryCouponIssuer::new()),
            policies: Arc::new(StaticPolicyStore::with_defaults()),
        }
    }
}

impl MemoryBackends {
    /// Wires the backends as [`Collaborators`] with the given call timeout.
    #[must_use]
    pub fn collaborators(&self, call_timeout: Duration) -> Collaborators {
        Collaborators {
            users: Arc::clone(&self.users) as _,
            content: Arc::clone(&self.content) as _,
            ledger: Arc::clone(&self.ledger) as _,
            badges: Arc::clone(&self.badges) as _,
            coupons: Arc::clone(&self.coupons) as _,
            policies: Arc::clone(&self.policies) as _,
            call_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DiscountType;

    #[test]
    fn ledger_tracks_balance_and_references() {
        let ledger = InMemoryPointLedger::new();
        let first = ledger.credit(UserId::new(1), 100, "vote", 7, "k1");
        let second = ledger.credit(UserId::new(1), 50, "vote", 8, "k2");
        assert_eq!(first.map(|r| r.reference), Ok("pt-1".to_string()));
        assert_eq!(second.map(|r| r.balance_after), Ok(150));
        assert_eq!(ledger.balance(UserId::new(1)), 150);
    }

    #[test]
    fn ledger_failure_injection_is_bounded() {
        let ledger = InMemoryPointLedger::new();
        ledger.fail_next(1);
        assert!(ledger.credit(UserId::new(1), 10, "x", 1, "k").is_err());
        assert!(ledger.credit(UserId::new(1), 10, "x", 1, "k").is_ok());
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn repeated_ledger_key_returns_the_first_receipt() {
        let ledger = InMemoryPointLedger::new();
        let first = ledger.credit(UserId::new(1), 100, "win", 1, "EVENT_REWARD:event#1:user#1");
        let again = ledger.credit(UserId::new(1), 100, "win", 1, "EVENT_REWARD:event#1:user#1");
        assert_eq!(first, again);
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.balance(UserId::new(1)), 100);
    }

    #[test]
    fn repeated_badge_key_is_recorded_once() {
        let log = InMemoryBadgeLog::new();
        for _ in 0..2 {
            let recorded = log.record(UserId::new(1), "EVENT_REWARD", "win", 1, "EVENT", "k");
            assert!(recorded.is_ok());
        }
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn coupon_codes_are_unique() {
        let issuer = InMemoryCouponIssuer::new();
        let request = CouponRequest {
            user_email: "a@example.com".to_string(),
            code: "EVT-1".to_string(),
            name: "Winner".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            free_shipping: true,
            expires_at: chrono::Utc::now(),
        };
        assert!(issuer.issue(&request).is_ok());
        assert!(matches!(
            issuer.issue(&request),
            Err(CollaboratorError::Rejected(_))
        ));
    }

    #[test]
    fn missing_policy_is_not_found() {
        let store = StaticPolicyStore::with_defaults();
        store.remove(RewardType::BattleVote);
        assert!(matches!(
            store.get(RewardType::BattleVote),
            Err(CollaboratorError::NotFound(_))
        ));
        assert!(store.get(RewardType::EventReward).is_ok());
    }
}
