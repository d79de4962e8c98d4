//! Full battle lifecycle through the public API: authoring, entries,
//! matchmaking, voting, scheduled finalization and settlement.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

use contest_engine::app_state::AppState;
use contest_engine::clock::{Clock, ManualClock};
use contest_engine::collaborators::User;
use contest_engine::collaborators::memory::MemoryBackends;
use contest_engine::config::EngineConfig;
use contest_engine::domain::{
    CouponSpec, DiscountType, EventType, NewEvent, RewardStatus, RewardTable, RewardTier,
    Submission, SubmissionId, UserId, VoteTarget,
};
use contest_engine::error::EngineError;
use contest_engine::jobs::run_status_pass;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    let Some(date) = NaiveDate::from_ymd_opt(y, m, d) else {
        panic!("invalid date");
    };
    date
}

fn battle() -> NewEvent {
    NewEvent {
        title: "Autumn photo battle".to_string(),
        event_type: EventType::Battle,
        purchase_start: date(2025, 8, 1),
        purchase_end: date(2025, 8, 15),
        event_start: date(2025, 8, 10),
        event_end: date(2025, 8, 20),
        announcement_date: date(2025, 8, 22),
        max_participants: 8,
        reward_table: RewardTable::new()
            .with_tier(
                1,
                RewardTier {
                    points: 10_000,
                    badge_points: 50,
                    coupon: Some(CouponSpec {
                        name: "Champion".to_string(),
                        discount_type: DiscountType::Percentage,
                        discount_value: 15,
                        free_shipping: true,
                        valid_days: 14,
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
            ),
    }
}

fn register(backends: &MemoryBackends, id: i64) {
    backends.users.insert(User {
        id: UserId::new(id),
        email: format!("player{id}@example.com"),
        nickname: format!("player{id}"),
    });
}

fn entry(id: i64, minutes: i64) -> Submission {
    let Some(opened) = date(2025, 8, 10).and_hms_opt(10, 0, 0) else {
        panic!("invalid time");
    };
    Submission {
        id: SubmissionId::new(id),
        owner: UserId::new(id),
        event_id: None,
        submitted_at: opened.and_utc() + ChronoDuration::minutes(minutes),
        has_media: true,
    }
}

#[tokio::test]
async fn battle_event_from_authoring_to_settlement() {
    let clock = Arc::new(ManualClock::on(date(2025, 8, 15)));
    let backends = MemoryBackends::default();
    let config = EngineConfig::default();
    let engine_clock: Arc<dyn Clock> = Arc::clone(&clock) as _;
    let collaborators = backends.collaborators(Duration::from_secs(2));
    let state = AppState::new(&config, collaborators, engine_clock);
    let service = &state.service;

    let event = assert_ok!(service.create_event(battle()).await);

    // Five entrants, one minute apart.
    for id in 1..=5 {
        register(&backends, id);
        let joined = assert_ok!(
            service
                .participate(event.id, UserId::new(id), entry(id, id))
                .await
        );
        assert_eq!(joined.user_id, UserId::new(id));
    }
    let duplicate = service.participate(event.id, UserId::new(1), entry(1, 9)).await;
    assert!(matches!(duplicate, Err(EngineError::Conflict(_))));

    let matches = assert_ok!(service.generate_matches(event.id).await);
    assert_eq!(matches.len(), 3);
    let Some(bye) = matches.iter().find(|m| m.is_bye()) else {
        panic!("odd field must produce a bye");
    };
    assert!(bye.is_complete());

    // Voters back the second entrant in every open match.
    for voter in 100..103 {
        register(&backends, voter);
        for matchup in matches.iter().filter(|m| !m.is_bye()) {
            let Some(choice) = matchup.participant2 else {
                panic!("open match without an opponent");
            };
            let target = VoteTarget::Match {
                match_id: matchup.id,
                choice,
            };
            assert_ok!(service.vote(event.id, UserId::new(voter), target).await);
        }
    }

    // Nothing happens before the announcement date.
    clock.set_today(date(2025, 8, 21));
    let early = run_status_pass(service).await;
    assert_eq!(early.finalized, 0);
    let late_vote = service
        .vote(
            event.id,
            UserId::new(100),
            VoteTarget::Match {
                match_id: bye.id,
                choice: bye.participant1,
            },
        )
        .await;
    assert_err!(late_vote);

    clock.set_today(date(2025, 8, 22));
    let pass = run_status_pass(service).await;
    assert_eq!(pass.finalized, 1);
    let finalize_again = service.finalize_result(event.id, false).await;
    assert!(matches!(finalize_again, Err(EngineError::Conflict(_))));

    let summary = assert_ok!(service.settle_rewards(event.id).await);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.total, summary.succeeded);

    // Player 2 won the earliest match with every vote and ranks first.
    let details = service.store().details_for_event(event.id).await;
    let Some(first) = details.iter().find(|d| d.rank == 1) else {
        panic!("no winner");
    };
    assert_eq!(first.user_id, UserId::new(2));
    assert!(details.iter().all(|d| d.reward_processed));

    let issued = backends.coupons.issued();
    assert_eq!(issued.len(), 1);
    assert!(issued.iter().all(|c| c.user_email == "player2@example.com"));
    assert_eq!(backends.ledger.balance(UserId::new(2)), 10_000 + 100);

    // Vote rewards are keyed to matches and drain through the primary sweep.
    let sweep = service.settlement().process_pending(100).await;
    assert_eq!((sweep.processed, sweep.failed), (6, 0));
    assert_eq!(backends.ledger.balance(UserId::new(100)), 20);

    // Every row settled exactly once; a second run has nothing to do.
    let again = assert_ok!(service.settle_rewards(event.id).await);
    assert_eq!(again.total, 0);
    let rows = service.store().reward_events_where(|_| true).await;
    assert!(rows.iter().all(|r| r.status == RewardStatus::Processed));
    assert!(service.operator_queue().await.is_empty());
}

#[test]
fn unknown_event_type_is_rejected_by_name() {
    let parsed = "LOTTERY".parse::<EventType>();
    assert!(matches!(parsed, Err(EngineError::NoStrategy(_))));
}
