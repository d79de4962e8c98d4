//! Shared builders for unit tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use chrono::{DateTime, NaiveDate, Utc};

use crate::clock::{Clock, ManualClock};
use crate::collaborators::User;
use crate::collaborators::memory::{
    InMemoryBadgeLog, InMemoryContentStore, InMemoryCouponIssuer, InMemoryPointLedger,
    InMemoryUserDirectory, MemoryBackends, StaticPolicyStore,
};
use crate::domain::{
    CouponSpec, DateWindow, DiscountType, Event, EventBus, EventId, EventStatus, EventType,
    NewEvent, PairingState, Participant, ParticipantId, RewardTable, RewardTier,
    StrategyMetadata, Submission, SubmissionId, UserId,
};
use crate::engine::{ResultCalculator, SettlementPipeline, SettlementSettings, StatusEngine};
use crate::service::ContestService;
use crate::store::ContestStore;

#[allow(clippy::panic)]
pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    let Some(date) = NaiveDate::from_ymd_opt(y, m, d) else {
        panic!("invalid date {y}-{m}-{d}");
    };
    date
}

fn at_minutes(minutes: i64) -> DateTime<Utc> {
    date(2025, 8, 10).and_hms_opt(9, 0, 0).unwrap_or_default().and_utc()
        + ChronoDuration::minutes(minutes)
}

/// Rank 1 and rank 2 rewards; rank 1 also carries a coupon.
pub(crate) fn reward_table() -> RewardTable {
    RewardTable::new()
        .with_tier(
            1,
            RewardTier {
                points: 10_000,
                badge_points: 50,
                coupon: Some(CouponSpec {
                    name: "Winner".to_string(),
                    discount_type: DiscountType::Percentage,
                    discount_value: 20,
                    free_shipping: true,
                    valid_days: 30,
                }),
            },
        )
        .with_tier(
            2,
            RewardTier {
                points: 5_000,
                badge_points: 20,
                coupon: None,
            },
        )
}

fn request(title: &str, event_type: EventType) -> NewEvent {
    NewEvent {
        title: title.to_string(),
        event_type,
        purchase_start: date(2025, 8, 10),
        purchase_end: date(2025, 8, 18),
        event_start: date(2025, 8, 10),
        event_end: date(2025, 8, 20),
        announcement_date: date(2025, 8, 22),
        max_participants: 10,
        reward_table: reward_table(),
    }
}

/// Authoring request for a battle running 2025-08-10..=2025-08-20.
pub(crate) fn battle_request() -> NewEvent {
    request("Summer battle", EventType::Battle)
}

/// Authoring request for a ranking event on the same dates.
pub(crate) fn ranking_request() -> NewEvent {
    request("Summer ranking", EventType::Ranking)
}

/// Stored-looking event with id 1, ongoing.
pub(crate) fn sample_event(event_type: EventType) -> Event {
    let req = request("Sample", event_type);
    let created = at_minutes(-60 * 24 * 10);
    Event {
        id: EventId::new(1),
        title: req.title,
        event_type,
        purchase_window: DateWindow::new(req.purchase_start, req.purchase_end),
        event_window: DateWindow::new(req.event_start, req.event_end),
        announcement_date: Some(req.announcement_date),
        max_participants: req.max_participants,
        status: EventStatus::Ongoing,
        reward_table: req.reward_table,
        created_at: created,
        updated_at: created,
        deleted_at: None,
    }
}

/// Media submission not posted under any event, `minutes` after the
/// event opened.
pub(crate) fn submission(id: i64, owner: UserId, minutes: i64) -> Submission {
    Submission {
        id: SubmissionId::new(id),
        owner,
        event_id: None,
        submitted_at: at_minutes(minutes),
        has_media: true,
    }
}

/// Legacy content posted under `event_id`.
pub(crate) fn legacy_submission(id: i64, owner: i64, event_id: EventId) -> Submission {
    Submission {
        event_id: Some(event_id),
        ..submission(id, UserId::new(owner), id)
    }
}

/// Waiting battle participant of event 1.
pub(crate) fn participant(id: i64, user_id: UserId, minutes: i64) -> Participant {
    Participant {
        id: ParticipantId::new(id),
        event_id: EventId::new(1),
        user_id,
        submission_id: SubmissionId::new(id),
        submitted_at: at_minutes(minutes),
        metadata: StrategyMetadata::Battle {
            pairing: PairingState::Waiting,
        },
        created_at: at_minutes(minutes),
    }
}

/// Fully wired engine over in-memory collaborators and a manual clock.
#[derive(Debug)]
pub(crate) struct Fixture {
    pub clock: Arc<ManualClock>,
    pub store: Arc<ContestStore>,
    pub event_bus: EventBus,
    pub users: Arc<InMemoryUserDirectory>,
    pub content: Arc<InMemoryContentStore>,
    pub ledger: Arc<InMemoryPointLedger>,
    pub badges: Arc<InMemoryBadgeLog>,
    pub coupons: Arc<InMemoryCouponIssuer>,
    pub policies: Arc<StaticPolicyStore>,
    pub status: StatusEngine,
    pub results: ResultCalculator,
    pub settlement: SettlementPipeline,
    pub service: ContestService,
}

#[allow(clippy::panic)]
impl Fixture {
    /// Builds the fixture with the clock at noon UTC on `today`.
    pub(crate) fn on(today: NaiveDate) -> Self {
        let clock = Arc::new(ManualClock::on(today));
        let store = Arc::new(ContestStore::new());
        let event_bus = EventBus::new(256);
        let backends = MemoryBackends::default();
        let collaborators = backends.collaborators(Duration::from_millis(500));
        let engine_clock: Arc<dyn Clock> = Arc::clone(&clock) as _;
        let service = ContestService::new(
            Arc::clone(&store),
            collaborators,
            engine_clock,
            event_bus.clone(),
            SettlementSettings::default(),
        );

        Self {
            status: service.status_engine().clone(),
            results: service.result_calculator().clone(),
            settlement: service.settlement().clone(),
            clock,
            store,
            event_bus,
            users: backends.users,
            content: backends.content,
            ledger: backends.ledger,
            badges: backends.badges,
            coupons: backends.coupons,
            policies: backends.policies,
            service,
        }
    }

    /// Directory record for user `n`.
    pub(crate) fn user(&self, n: i64) -> User {
        User {
            id: UserId::new(n),
            email: format!("user{n}@example.com"),
            nickname: format!("user{n}"),
        }
    }

    pub(crate) async fn battle_event(&self) -> Event {
        let Ok(event) = self.service.create_event(battle_request()).await else {
            panic!("battle event rejected");
        };
        event
    }

    pub(crate) async fn ranking_event(&self) -> Event {
        let Ok(event) = self.service.create_event(ranking_request()).await else {
            panic!("ranking event rejected");
        };
        event
    }

    /// Registers user `user` and enters them with submission `user`.
    pub(crate) async fn join(&self, event_id: EventId, user: i64) -> Participant {
        self.users.insert(self.user(user));
        let entry = submission(user, UserId::new(user), user);
        match self.service.participate(event_id, UserId::new(user), entry).await {
            Ok(participant) => participant,
            Err(e) => panic!("user {user} could not join {event_id}: {e}"),
        }
    }
}
