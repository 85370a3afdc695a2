// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::{DashMap, DashSet};
use lap_tracker::config::Config;
use lap_tracker::db::{CredentialStore, FirestoreDb, MemoryDb};
use lap_tracker::models::Credential;
use lap_tracker::routes::create_router;
use lap_tracker::services::{TelemetryError, Upstream, UpstreamResponse};
use lap_tracker::time_utils::ManualClock;
use lap_tracker::{AppState, Stores};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Fixed starting point for the manual clock.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 14, 13, 0, 0).unwrap()
}

/// One recorded upstream request.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RecordedCall {
    #[allow(dead_code)]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Scripted Race Monitor. Unknown racers get an unsuccessful envelope.
#[derive(Default)]
pub struct FakeUpstream {
    racers: DashMap<u64, Value>,
    failing: DashMap<u64, String>,
    stalled: DashSet<u64>,
    session: Mutex<Option<Value>>,
    results_session: Mutex<Option<Value>>,
    results_competitors: DashMap<u64, Value>,
    calls: Mutex<Vec<RecordedCall>>,
}

#[allow(dead_code)]
impl FakeUpstream {
    /// Serve `Details` for a racer on GetRacer.
    pub fn set_racer(&self, racer_id: u64, competitor: Value, laps: Value) {
        self.racers.insert(
            racer_id,
            json!({"Competitor": competitor, "Laps": laps}),
        );
    }

    /// Make GetRacer for this racer fail at the transport level.
    pub fn fail_racer(&self, racer_id: u64, message: &str) {
        self.failing.insert(racer_id, message.to_string());
    }

    /// Make GetRacer for this racer never answer.
    pub fn stall_racer(&self, racer_id: u64) {
        self.stalled.insert(racer_id);
    }

    pub fn heal_racer(&self, racer_id: u64) {
        self.failing.remove(&racer_id);
        self.stalled.remove(&racer_id);
    }

    /// Serve a GetSession roster of `(racer_id, position)` pairs.
    pub fn set_session(&self, competitors: &[(u64, Value)]) {
        let map: serde_json::Map<String, Value> = competitors
            .iter()
            .map(|(id, position)| {
                (
                    id.to_string(),
                    json!({"RacerID": id.to_string(), "Position": position}),
                )
            })
            .collect();
        *self.session.lock().unwrap() = Some(json!({"Competitors": map}));
    }

    pub fn set_results_session(&self, competitor_ids: &[u64]) {
        let sorted: Vec<Value> = competitor_ids.iter().map(|id| json!({"ID": id})).collect();
        *self.results_session.lock().unwrap() = Some(json!({"SortedCompetitors": sorted}));
    }

    pub fn set_results_competitor(&self, competitor_id: u64, competitor: Value) {
        self.results_competitors.insert(competitor_id, competitor);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

fn ok(body: Value) -> UpstreamResponse {
    let mut body = body;
    body["Successful"] = Value::Bool(true);
    UpstreamResponse {
        status: 200,
        body: body.to_string(),
    }
}

fn unsuccessful(message: &str) -> UpstreamResponse {
    UpstreamResponse {
        status: 200,
        body: json!({"Successful": false, "Message": message}).to_string(),
    }
}

fn param_u64(query: &[(&str, String)], key: &str) -> u64 {
    query
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TelemetryError> {
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        match path {
            "/v2/Live/GetRacer" => {
                let racer_id = param_u64(query, "racerID");
                if self.stalled.contains(&racer_id) {
                    return std::future::pending().await;
                }
                if let Some(message) = self.failing.get(&racer_id) {
                    return Err(TelemetryError::Transport(message.clone()));
                }
                Ok(match self.racers.get(&racer_id) {
                    Some(details) => ok(json!({"Details": details.clone()})),
                    None => unsuccessful("Racer not found"),
                })
            }
            "/v2/Live/GetSession" => Ok(match self.session.lock().unwrap().clone() {
                Some(session) => ok(json!({"Session": session})),
                None => unsuccessful("Race not found"),
            }),
            "/v2/Results/SessionDetails" => {
                Ok(match self.results_session.lock().unwrap().clone() {
                    Some(session) => ok(json!({"Session": session})),
                    None => unsuccessful("Session not found"),
                })
            }
            "/v2/Results/CompetitorDetails" => {
                let competitor_id = param_u64(query, "competitorID");
                Ok(match self.results_competitors.get(&competitor_id) {
                    Some(c) => ok(json!({"Competitor": c.clone()})),
                    None => unsuccessful("Competitor not found"),
                })
            }
            other => Ok(UpstreamResponse {
                status: 404,
                body: format!("no route for {}", other),
            }),
        }
    }
}

/// Everything a test needs to drive and inspect the app.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub db: Arc<MemoryDb>,
    pub upstream: Arc<FakeUpstream>,
    pub clock: Arc<ManualClock>,
}

/// Test config: default tiers and a budget large enough to never block.
#[allow(dead_code)]
pub fn test_config() -> Config {
    Config {
        rate_limit_max_calls: 1000,
        ..Config::test_default()
    }
}

/// In-memory app with a fake upstream and a manual clock at [`t0`].
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with(test_config())
}

#[allow(dead_code)]
pub fn create_test_app_with(config: Config) -> TestApp {
    let db = Arc::new(MemoryDb::new());
    let upstream = Arc::new(FakeUpstream::default());
    let clock = Arc::new(ManualClock::new(t0()));

    let state = Arc::new(AppState::new(
        config,
        Stores::memory(db.clone()),
        upstream.clone(),
        clock.clone(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        db,
        upstream,
        clock,
    }
}

/// Store a credential directly.
#[allow(dead_code)]
pub async fn seed_credential(db: &MemoryDb, id: u64, race_id: u64, last_used: Option<DateTime<Utc>>) {
    db.put_credential(&Credential {
        id,
        token: format!("token-{:04}-secret", id),
        race_id,
        last_used,
        updated_at: t0(),
    })
    .await
    .unwrap();
}
