// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end scheduling ticks against the in-memory store and a fake
//! Race Monitor.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use lap_tracker::db::{
    CredentialStore, MemoryDb, RaceStore, StoreError, TierStore, UpsertOutcome,
};
use lap_tracker::models::{CompetitorRecord, LapRecord, UNKNOWN_DURATION_MS};
use lap_tracker::services::{
    CredentialError, SyncError, TelemetryError, TickFailure, TickOutcome,
};
use lap_tracker::time_utils::ManualClock;
use lap_tracker::{AppState, Stores};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{create_test_app, seed_credential, t0, FakeUpstream, TestApp};

const RACE: u64 = 900;

/// fast(120s): 1, 2; slow(240s): 3; rest(0s): 4, 5. All never refreshed.
async fn three_tier_app() -> TestApp {
    let app = create_test_app();
    seed_credential(&app.db, 1, RACE, None).await;
    for (tier, racer) in [("fast", 1), ("fast", 2), ("slow", 3), ("rest", 4), ("rest", 5)] {
        app.db.add_member(tier, racer).await.unwrap();
    }
    for racer in 1..=5u64 {
        app.upstream.set_racer(
            racer,
            json!({"RacerID": racer.to_string(), "Position": racer, "Laps": "1"}),
            json!([{"Lap": "1", "Position": racer, "LapTime": "01:02.500"}]),
        );
    }
    app
}

fn assert_synced(outcome: &TickOutcome, racer: u64, tier_name: &str) {
    match outcome {
        TickOutcome::Synced { racer_id, tier } => {
            assert_eq!((*racer_id, tier.as_str()), (racer, tier_name));
        }
        other => panic!("expected Synced({}, {}), got {:?}", racer, tier_name, other),
    }
}

async fn last_refreshed(
    db: &MemoryDb,
    tier: &str,
    racer_id: u64,
) -> Option<chrono::DateTime<chrono::Utc>> {
    db.list_members(tier)
        .await
        .unwrap()
        .into_iter()
        .find(|m| m.racer_id == racer_id)
        .expect("member exists")
        .last_refreshed
}

#[tokio::test]
async fn test_first_tick_picks_lowest_id_among_never_refreshed() {
    let app = three_tier_app().await;

    let outcome = app.state.scheduler.run_one_tick().await;
    assert_synced(&outcome, 1, "fast");

    let calls = app.upstream.calls_to("/v2/Live/GetRacer");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].param("racerID"), Some("001"));
    assert_eq!(calls[0].param("raceID"), Some("900"));
    assert_eq!(calls[0].param("apiToken"), Some("token-0001-secret"));

    let stored = app.db.get_competitor(RACE, 1).await.unwrap().unwrap();
    assert_eq!(stored.position, 1);
    assert_eq!(app.db.list_laps(RACE, 1).await.unwrap()[0].lap_time_ms, 62_500);
    assert_eq!(last_refreshed(&app.db, "fast", 1).await, Some(t0()));
}

#[tokio::test]
async fn test_due_fast_member_beats_recently_touched_rest_member() {
    let app = three_tier_app().await;
    let now = t0();
    for (tier, racer, ago) in [
        ("fast", 1, 10),
        ("fast", 2, 121),
        ("slow", 3, 30),
        ("rest", 4, 1),
        ("rest", 5, 5),
    ] {
        app.db
            .advance_last_refreshed(tier, racer, now - ChronoDuration::seconds(ago))
            .await
            .unwrap();
    }

    let outcome = app.state.scheduler.run_one_tick().await;
    assert_synced(&outcome, 2, "fast");
    assert_eq!(last_refreshed(&app.db, "fast", 2).await, Some(now));
}

#[tokio::test]
async fn test_not_due_reports_wait_hint_and_fetches_nothing() {
    let app = three_tier_app().await;
    app.db.remove_member("rest", 4).await.unwrap();
    app.db.remove_member("rest", 5).await.unwrap();
    for (tier, racer, ago) in [("fast", 1, 100), ("fast", 2, 50), ("slow", 3, 10)] {
        app.db
            .advance_last_refreshed(tier, racer, t0() - ChronoDuration::seconds(ago))
            .await
            .unwrap();
    }

    match app.state.scheduler.run_one_tick().await {
        TickOutcome::NotDue {
            racer_id,
            tier,
            wait_hint,
        } => {
            assert_eq!((racer_id, tier.as_str()), (1, "fast"));
            assert_eq!(wait_hint, Duration::from_secs(20));
        }
        other => panic!("expected NotDue, got {:?}", other),
    }
    assert!(app.upstream.calls().is_empty());
}

#[tokio::test]
async fn test_no_candidates_when_tiers_empty() {
    let app = create_test_app();
    seed_credential(&app.db, 1, RACE, None).await;

    assert!(matches!(
        app.state.scheduler.run_one_tick().await,
        TickOutcome::NoCandidates
    ));
    assert!(app.upstream.calls().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_leaves_member_untouched_and_retries() {
    let app = three_tier_app().await;
    app.upstream.fail_racer(1, "connection reset");

    let outcome = app.state.scheduler.run_one_tick().await;
    assert!(matches!(
        outcome,
        TickOutcome::Failed(TickFailure::Fetch {
            racer_id: 1,
            source: TelemetryError::Transport(_),
            ..
        })
    ));
    assert_eq!(last_refreshed(&app.db, "fast", 1).await, None);
    assert!(app.db.get_competitor(RACE, 1).await.unwrap().is_none());

    app.upstream.heal_racer(1);
    app.clock.advance(Duration::from_secs(5));
    assert_synced(&app.state.scheduler.run_one_tick().await, 1, "fast");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_upstream_times_out_and_leaves_member_untouched() {
    let app = three_tier_app().await;
    app.upstream.stall_racer(1);

    let outcome = tokio::time::timeout(
        Duration::from_secs(3600),
        app.state.scheduler.run_one_tick(),
    )
    .await
    .expect("tick must end at the request timeout");
    assert!(matches!(
        outcome,
        TickOutcome::Failed(TickFailure::Fetch {
            racer_id: 1,
            source: TelemetryError::Transport(_),
            ..
        })
    ));
    assert_eq!(last_refreshed(&app.db, "fast", 1).await, None);
    assert!(app.db.get_competitor(RACE, 1).await.unwrap().is_none());

    app.upstream.heal_racer(1);
    assert_synced(&app.state.scheduler.run_one_tick().await, 1, "fast");
}

#[tokio::test]
async fn test_unsuccessful_response_is_upstream_failure() {
    let app = create_test_app();
    seed_credential(&app.db, 1, RACE, None).await;
    app.db.add_member("fast", 77).await.unwrap();

    let outcome = app.state.scheduler.run_one_tick().await;
    match outcome {
        TickOutcome::Failed(TickFailure::Fetch {
            source: TelemetryError::Upstream(message),
            ..
        }) => assert_eq!(message, "Racer not found"),
        other => panic!("expected upstream failure, got {:?}", other),
    }
    assert_eq!(last_refreshed(&app.db, "fast", 77).await, None);
}

#[tokio::test]
async fn test_no_credentials_fails_tick_without_fetch() {
    let app = create_test_app();
    app.db.add_member("fast", 1).await.unwrap();

    let outcome = app.state.scheduler.run_one_tick().await;
    assert!(matches!(
        outcome,
        TickOutcome::Failed(TickFailure::Fetch {
            source: TelemetryError::Credentials(CredentialError::NoCredentialsAvailable),
            ..
        })
    ));
    assert!(app.upstream.calls().is_empty());
    assert_eq!(last_refreshed(&app.db, "fast", 1).await, None);
}

#[tokio::test]
async fn test_every_member_keeps_getting_refreshed() {
    let app = three_tier_app().await;
    let mut order = Vec::new();
    let mut synced: HashMap<u64, usize> = HashMap::new();

    for _ in 0..200 {
        match app.state.scheduler.run_one_tick().await {
            TickOutcome::Synced { racer_id, .. } => {
                order.push(racer_id);
                *synced.entry(racer_id).or_default() += 1;
            }
            TickOutcome::NotDue { wait_hint, .. } => {
                assert!(wait_hint >= Duration::from_secs(5));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        app.clock.advance(Duration::from_secs(5));
    }

    assert_eq!(order[..5], [1, 2, 3, 4, 5]);
    for racer in 1..=5u64 {
        assert!(
            synced.get(&racer).copied().unwrap_or(0) >= 2,
            "racer {} starved: {:?}",
            racer,
            synced
        );
    }
}

#[tokio::test]
async fn test_overlapping_membership_touches_only_selected_row() {
    let app = create_test_app();
    seed_credential(&app.db, 1, RACE, None).await;
    app.db.add_member("fast", 7).await.unwrap();
    app.db.add_member("rest", 7).await.unwrap();
    app.upstream.set_racer(7, json!({"RacerID": 7}), json!([]));

    assert_synced(&app.state.scheduler.run_one_tick().await, 7, "fast");
    assert_eq!(last_refreshed(&app.db, "fast", 7).await, Some(t0()));
    assert_eq!(last_refreshed(&app.db, "rest", 7).await, None);

    app.clock.advance(Duration::from_secs(5));
    assert_synced(&app.state.scheduler.run_one_tick().await, 7, "rest");
    assert_eq!(last_refreshed(&app.db, "fast", 7).await, Some(t0()));
}

#[tokio::test]
async fn test_repolled_laps_are_not_duplicated_or_rewritten() {
    let app = create_test_app();
    seed_credential(&app.db, 1, RACE, None).await;
    app.db.add_member("fast", 7).await.unwrap();
    app.upstream.set_racer(
        7,
        json!({"RacerID": 7, "Position": "3", "Laps": "2", "TotalTime": "bogus"}),
        json!([
            {"Lap": "1", "LapTime": "00:41.000"},
            {"Lap": "2", "LapTime": "00:40.500"}
        ]),
    );
    assert_synced(&app.state.scheduler.run_one_tick().await, 7, "fast");

    let first = app.db.get_competitor(RACE, 7).await.unwrap().unwrap();
    assert_eq!(first.position, 3);
    assert_eq!(first.laps_completed, 2);
    assert_eq!(first.total_time_ms, UNKNOWN_DURATION_MS);

    app.upstream.set_racer(
        7,
        json!({"RacerID": 7, "Position": "1", "Laps": "3", "TotalTime": "02:03.000"}),
        json!([
            {"Lap": "1", "LapTime": "00:59.999"},
            {"Lap": "2", "LapTime": "00:40.500"},
            {"Lap": "3", "LapTime": "00:41.500"}
        ]),
    );
    app.clock.advance(Duration::from_secs(121));
    assert_synced(&app.state.scheduler.run_one_tick().await, 7, "fast");

    let laps = app.db.list_laps(RACE, 7).await.unwrap();
    let numbers: Vec<i64> = laps.iter().map(|l| l.lap_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(laps[0].lap_time_ms, 41_000);

    let second = app.db.get_competitor(RACE, 7).await.unwrap().unwrap();
    assert_eq!(second.position, 1);
    assert_eq!(second.total_time_ms, 123_000);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn test_ticks_rotate_credentials() {
    let app = three_tier_app().await;
    seed_credential(&app.db, 2, RACE, None).await;

    for _ in 0..3 {
        app.state.scheduler.run_one_tick().await;
        app.clock.advance(Duration::from_secs(5));
    }

    let tokens: Vec<String> = app
        .upstream
        .calls_to("/v2/Live/GetRacer")
        .iter()
        .map(|c| c.param("apiToken").unwrap().to_string())
        .collect();
    assert_eq!(
        tokens,
        vec!["token-0001-secret", "token-0002-secret", "token-0001-secret"]
    );

    let cred = app.db.get_credential(1).await.unwrap().unwrap();
    assert_eq!(cred.last_used, Some(t0() + ChronoDuration::seconds(10)));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_share_one_call_budget() {
    let mut config = common::test_config();
    config.rate_limit_max_calls = 2;
    config.rate_limit_window = Duration::from_secs(60);
    let app = common::create_test_app_with(config);
    seed_credential(&app.db, 1, RACE, None).await;
    for racer in 1..=3u64 {
        app.db.add_member("rest", racer).await.unwrap();
        app.upstream.set_racer(racer, json!({"RacerID": racer}), json!([]));
    }

    let start = tokio::time::Instant::now();
    for racer in 1..=3u64 {
        assert_synced(&app.state.scheduler.run_one_tick().await, racer, "rest");
    }
    assert!(start.elapsed() >= Duration::from_secs(60));
}

// ─── Partial lap failure ─────────────────────────────────────────────────

/// Race store that fails inserts of one lap number until healed.
struct FlakyLaps {
    inner: Arc<MemoryDb>,
    bad_lap: i64,
    broken: AtomicBool,
}

#[async_trait]
impl RaceStore for FlakyLaps {
    async fn upsert_competitor(
        &self,
        record: &CompetitorRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        self.inner.upsert_competitor(record).await
    }

    async fn get_competitor(
        &self,
        race_id: u64,
        racer_id: u64,
    ) -> Result<Option<CompetitorRecord>, StoreError> {
        self.inner.get_competitor(race_id, racer_id).await
    }

    async fn insert_lap_if_absent(&self, lap: &LapRecord) -> Result<bool, StoreError> {
        if lap.lap_number == self.bad_lap && self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("deadline exceeded".to_string()));
        }
        self.inner.insert_lap_if_absent(lap).await
    }

    async fn list_laps(&self, race_id: u64, racer_id: u64) -> Result<Vec<LapRecord>, StoreError> {
        self.inner.list_laps(race_id, racer_id).await
    }
}

#[tokio::test]
async fn test_partial_lap_failure_skips_touch_then_recovers() {
    let db = Arc::new(MemoryDb::new());
    let flaky = Arc::new(FlakyLaps {
        inner: db.clone(),
        bad_lap: 2,
        broken: AtomicBool::new(true),
    });
    let upstream = Arc::new(FakeUpstream::default());
    let clock = Arc::new(ManualClock::new(t0()));
    let state = AppState::new(
        common::test_config(),
        Stores {
            credentials: db.clone(),
            tiers: db.clone(),
            races: flaky.clone(),
        },
        upstream.clone(),
        clock.clone(),
    );

    seed_credential(&db, 1, RACE, None).await;
    db.add_member("fast", 7).await.unwrap();
    upstream.set_racer(
        7,
        json!({"RacerID": 7, "Laps": 3}),
        json!([{"Lap": 1}, {"Lap": 2}, {"Lap": 3}]),
    );

    let outcome = state.scheduler.run_one_tick().await;
    assert!(matches!(
        outcome,
        TickOutcome::Failed(TickFailure::Merge {
            racer_id: 7,
            source: SyncError::PartialLaps { failed: 1, total: 3 },
            ..
        })
    ));
    // The competitor write and the good laps stay; the tier row does not move.
    assert!(db.get_competitor(RACE, 7).await.unwrap().is_some());
    assert_eq!(db.lap_count(), 2);
    assert_eq!(last_refreshed(&db, "fast", 7).await, None);

    flaky.broken.store(false, Ordering::SeqCst);
    clock.advance(Duration::from_secs(5));
    assert_synced(&state.scheduler.run_one_tick().await, 7, "fast");
    assert_eq!(db.lap_count(), 3);
    assert!(last_refreshed(&db, "fast", 7).await.is_some());
}
