// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Merge fetched racer data into storage.
//!
//! The competitor record is upserted (identity fields fixed at creation,
//! standings overwritten), laps are insert-if-absent, and only a fully
//! successful merge touches the racer's tier row. Re-running a merge after a
//! crash between the two writes is harmless.

use crate::db::{RaceStore, StoreError, UpsertOutcome};
use crate::models::{CompetitorRecord, LapRecord, RacerDetails};
use crate::services::tiers::{RegistryError, TierRegistry};
use crate::time_utils::Clock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Payload has no racer id")]
    MissingRacerId,

    #[error("Competitor upsert failed: {0}")]
    Competitor(#[source] StoreError),

    #[error("{failed} of {total} lap inserts failed")]
    PartialLaps { failed: usize, total: usize },

    #[error("Tier touch failed: {0}")]
    Touch(#[source] RegistryError),
}

/// What one merge wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub race_id: u64,
    pub racer_id: u64,
    pub competitor: UpsertOutcome,
    pub laps_inserted: usize,
    pub laps_existing: usize,
    /// Laps dropped because they carried no usable lap number.
    pub laps_rejected: usize,
    /// False if the tier row vanished before it could be touched, or the
    /// merge was a plain ingest.
    pub touched: bool,
}

pub struct SyncEngine {
    races: Arc<dyn RaceStore>,
    registry: Arc<TierRegistry>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(
        races: Arc<dyn RaceStore>,
        registry: Arc<TierRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            races,
            registry,
            clock,
        }
    }

    /// Merge a polled racer and mark its tier row refreshed.
    pub async fn merge(
        &self,
        tier: &str,
        racer_id: u64,
        details: &RacerDetails,
    ) -> Result<MergeReport, SyncError> {
        let mut report = self.ingest(racer_id, details).await?;

        // Touch the row that was selected, even if upstream reported a
        // different id for it.
        report.touched = self
            .registry
            .touch(tier, racer_id)
            .await
            .map_err(SyncError::Touch)?;

        tracing::info!(
            race_id = report.race_id,
            racer_id = report.racer_id,
            tier,
            laps_inserted = report.laps_inserted,
            laps_existing = report.laps_existing,
            "Racer synced"
        );
        Ok(report)
    }

    /// Upsert competitor and laps without touching any tier.
    ///
    /// `racer_id` is used when the payload carries no id of its own.
    pub async fn ingest(
        &self,
        racer_id: u64,
        details: &RacerDetails,
    ) -> Result<MergeReport, SyncError> {
        let mut competitor =
            CompetitorRecord::from_raw(details.race_id, &details.competitor, self.clock.now());
        if competitor.racer_id == 0 {
            if racer_id == 0 {
                return Err(SyncError::MissingRacerId);
            }
            competitor.racer_id = racer_id;
        } else if racer_id != 0 && competitor.racer_id != racer_id {
            tracing::warn!(
                requested = racer_id,
                reported = competitor.racer_id,
                "Upstream returned a different racer than requested"
            );
        }
        let racer_id = competitor.racer_id;

        let outcome = self
            .races
            .upsert_competitor(&competitor)
            .await
            .map_err(SyncError::Competitor)?;

        let laps: Vec<LapRecord> = details
            .laps
            .iter()
            .filter_map(|raw| LapRecord::from_raw(details.race_id, racer_id, raw))
            .collect();
        let laps_rejected = details.laps.len() - laps.len();
        if laps_rejected > 0 {
            tracing::warn!(
                race_id = details.race_id,
                racer_id,
                laps_rejected,
                "Skipping laps without a lap number"
            );
        }

        let mut laps_inserted = 0;
        let mut laps_existing = 0;
        let mut failed = 0;
        for (lap, result) in laps.iter().zip(self.races.insert_laps(&laps).await) {
            match result {
                Ok(true) => laps_inserted += 1,
                Ok(false) => laps_existing += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        race_id = lap.race_id,
                        racer_id,
                        lap_number = lap.lap_number,
                        error = %e,
                        "Lap insert failed"
                    );
                }
            }
        }

        if failed > 0 {
            return Err(SyncError::PartialLaps {
                failed,
                total: laps.len(),
            });
        }

        Ok(MergeReport {
            race_id: details.race_id,
            racer_id,
            competitor: outcome,
            laps_inserted,
            laps_existing,
            laps_rejected,
            touched: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryDb, TierStore};
    use crate::models::payload::{RawCompetitor, RawLap};
    use crate::models::{Tier, UNKNOWN_DURATION_MS};
    use crate::time_utils::SystemClock;
    use serde_json::json;
    use std::time::Duration;

    fn details(race_id: u64, competitor: serde_json::Value, laps: serde_json::Value) -> RacerDetails {
        RacerDetails {
            race_id,
            competitor: serde_json::from_value::<RawCompetitor>(competitor).unwrap(),
            laps: serde_json::from_value::<Vec<RawLap>>(laps).unwrap(),
        }
    }

    fn engine(db: Arc<MemoryDb>) -> SyncEngine {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(TierRegistry::new(
            vec![Tier::new("fast", Duration::from_secs(120))],
            db.clone(),
            clock.clone(),
        ));
        SyncEngine::new(db, registry, clock)
    }

    #[tokio::test]
    async fn test_merge_normalises_and_touches() {
        let db = Arc::new(MemoryDb::new());
        db.add_member("fast", 7).await.unwrap();
        let engine = engine(db.clone());

        let payload = details(
            900,
            json!({"RacerID": 7, "Position": "3", "Laps": "12", "TotalTime": "??"}),
            json!([{"Lap": 1, "LapTime": "00:41.200"}, {"Lap": "2", "LapTime": "00:40.900"}]),
        );
        let report = engine.merge("fast", 7, &payload).await.unwrap();

        assert_eq!(report.competitor, UpsertOutcome::Inserted);
        assert_eq!(report.laps_inserted, 2);
        assert!(report.touched);

        let stored = db.get_competitor(900, 7).await.unwrap().unwrap();
        assert_eq!(stored.position, 3);
        assert_eq!(stored.laps_completed, 12);
        assert_eq!(stored.total_time_ms, UNKNOWN_DURATION_MS);

        let member = db.oldest_member("fast").await.unwrap().unwrap();
        assert!(member.last_refreshed.is_some());
    }

    #[tokio::test]
    async fn test_reingest_same_laps_is_noop() {
        let db = Arc::new(MemoryDb::new());
        let engine = engine(db.clone());
        let payload = details(1, json!({"RacerID": 7}), json!([{"Lap": 1}, {"Lap": 2}]));

        engine.ingest(7, &payload).await.unwrap();
        let second = engine.ingest(7, &payload).await.unwrap();

        assert_eq!(second.competitor, UpsertOutcome::Updated);
        assert_eq!(second.laps_inserted, 0);
        assert_eq!(second.laps_existing, 2);
        assert_eq!(db.lap_count(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_requested_id() {
        let db = Arc::new(MemoryDb::new());
        let engine = engine(db.clone());
        let payload = details(1, json!({"FirstName": "Ana"}), json!([{"Lap": 1}, {"LapTime": "x"}]));

        let report = engine.ingest(42, &payload).await.unwrap();
        assert_eq!(report.racer_id, 42);
        assert_eq!(report.laps_rejected, 1);
        assert!(db.get_competitor(1, 42).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_racer_id() {
        let db = Arc::new(MemoryDb::new());
        let engine = engine(db);
        let payload = details(1, json!({}), json!([]));
        assert!(matches!(
            engine.ingest(0, &payload).await,
            Err(SyncError::MissingRacerId)
        ));
    }
}
