// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Backfill a finished session from the results endpoints.
//!
//! Uses the same upsert and insert-if-absent merge as live polling, but never
//! touches tier rows.

use crate::services::race_monitor::{TelemetryClient, TelemetryError};
use crate::services::sync::SyncEngine;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub session_id: u64,
    pub competitors: usize,
    pub ingested: usize,
    pub failed: usize,
    pub laps_inserted: usize,
    pub laps_existing: usize,
}

pub struct ResultsIngestor {
    telemetry: Arc<TelemetryClient>,
    sync: Arc<SyncEngine>,
}

impl ResultsIngestor {
    pub fn new(telemetry: Arc<TelemetryClient>, sync: Arc<SyncEngine>) -> Self {
        Self { telemetry, sync }
    }

    /// Fetch and merge every competitor of a session.
    ///
    /// A failed competitor is logged and counted; the rest of the session
    /// still gets ingested. Running out of credentials aborts the whole run.
    pub async fn ingest_session(&self, session_id: u64) -> Result<IngestReport, TelemetryError> {
        let competitor_ids: Vec<u64> = self
            .telemetry
            .fetch_results_session(session_id)
            .await?
            .into_iter()
            .filter(|&id| id > 0)
            .collect();

        let mut report = IngestReport {
            session_id,
            competitors: competitor_ids.len(),
            ..Default::default()
        };

        for competitor_id in competitor_ids {
            let details = match self.telemetry.fetch_results_competitor(competitor_id).await {
                Ok(details) => details,
                Err(e) if e.is_configuration_fault() => return Err(e),
                Err(e) => {
                    tracing::warn!(session_id, competitor_id, error = %e, "Competitor fetch failed");
                    report.failed += 1;
                    continue;
                }
            };

            if details.race_id == 0 {
                tracing::warn!(session_id, competitor_id, "Competitor result has no race id");
                report.failed += 1;
                continue;
            }

            match self.sync.ingest(competitor_id, &details).await {
                Ok(merged) => {
                    report.ingested += 1;
                    report.laps_inserted += merged.laps_inserted;
                    report.laps_existing += merged.laps_existing;
                }
                Err(e) => {
                    tracing::error!(session_id, competitor_id, error = %e, "Competitor merge failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            session_id,
            competitors = report.competitors,
            ingested = report.ingested,
            failed = report.failed,
            laps_inserted = report.laps_inserted,
            "Session results ingested"
        );
        Ok(report)
    }
}
