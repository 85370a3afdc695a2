// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! The scheduling tick and the background loop that repeats it.
//!
//! One tick does at most one fetch and merge:
//! select → acquire credential → mark used → reserve budget → fetch → merge →
//! touch. Nothing here returns an error to the caller; every failure becomes
//! [`TickOutcome::Failed`], and the entity simply stays eligible.

use crate::services::race_monitor::{TelemetryClient, TelemetryError};
use crate::services::selector::{PollSelector, Selection};
use crate::services::sync::{SyncEngine, SyncError};
use crate::services::tiers::RegistryError;
use crate::time_utils::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Why a tick failed.
#[derive(Debug, thiserror::Error)]
pub enum TickFailure {
    #[error("Selection failed: {0}")]
    Selection(#[source] RegistryError),

    #[error("Fetch of racer {racer_id} ({tier}) failed: {source}")]
    Fetch {
        racer_id: u64,
        tier: String,
        #[source]
        source: TelemetryError,
    },

    #[error("Merge of racer {racer_id} ({tier}) failed: {source}")]
    Merge {
        racer_id: u64,
        tier: String,
        #[source]
        source: SyncError,
    },
}

#[derive(Debug)]
pub enum TickOutcome {
    Synced { racer_id: u64, tier: String },
    NotDue {
        racer_id: u64,
        tier: String,
        wait_hint: Duration,
    },
    NoCandidates,
    Failed(TickFailure),
}

/// Serializable summary of a tick, for status and the admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub racer_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_hint_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl TickOutcome {
    pub fn report(&self, at: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            outcome: "",
            racer_id: None,
            tier: None,
            wait_hint_secs: None,
            error: None,
            at,
        };
        match self {
            TickOutcome::Synced { racer_id, tier } => {
                report.outcome = "synced";
                report.racer_id = Some(*racer_id);
                report.tier = Some(tier.clone());
            }
            TickOutcome::NotDue {
                racer_id,
                tier,
                wait_hint,
            } => {
                report.outcome = "not_due";
                report.racer_id = Some(*racer_id);
                report.tier = Some(tier.clone());
                report.wait_hint_secs = Some(wait_hint.as_secs_f64());
            }
            TickOutcome::NoCandidates => report.outcome = "no_candidates",
            TickOutcome::Failed(failure) => {
                report.outcome = "failed";
                if let TickFailure::Fetch { racer_id, tier, .. }
                | TickFailure::Merge { racer_id, tier, .. } = failure
                {
                    report.racer_id = Some(*racer_id);
                    report.tier = Some(tier.clone());
                }
                report.error = Some(failure.to_string());
            }
        }
        report
    }
}

/// Runs single ticks.
pub struct Scheduler {
    selector: PollSelector,
    telemetry: Arc<TelemetryClient>,
    sync: Arc<SyncEngine>,
}

impl Scheduler {
    pub fn new(
        selector: PollSelector,
        telemetry: Arc<TelemetryClient>,
        sync: Arc<SyncEngine>,
    ) -> Self {
        Self {
            selector,
            telemetry,
            sync,
        }
    }

    pub async fn run_one_tick(&self) -> TickOutcome {
        let selection = match self.selector.select().await {
            Ok(selection) => selection,
            Err(e) => {
                tracing::error!(error = %e, "Tick selection failed");
                return TickOutcome::Failed(TickFailure::Selection(e));
            }
        };

        let (racer_id, tier) = match selection {
            Selection::NoCandidates => {
                tracing::debug!("No tier members to poll");
                return TickOutcome::NoCandidates;
            }
            Selection::NotDue {
                racer_id,
                tier,
                wait_hint,
            } => {
                tracing::debug!(
                    racer_id,
                    tier = %tier,
                    wait_hint_secs = wait_hint.as_secs_f64(),
                    "Stalest racer not due yet"
                );
                return TickOutcome::NotDue {
                    racer_id,
                    tier,
                    wait_hint,
                };
            }
            Selection::Due { racer_id, tier } => (racer_id, tier),
        };

        let details = match self.telemetry.fetch_entity(racer_id).await {
            Ok(details) => details,
            Err(e) => {
                if e.is_configuration_fault() {
                    tracing::error!(
                        racer_id,
                        tier = %tier,
                        error = %e,
                        "No usable API credentials; add one to resume polling"
                    );
                } else {
                    tracing::warn!(racer_id, tier = %tier, error = %e, "Racer fetch failed");
                }
                return TickOutcome::Failed(TickFailure::Fetch {
                    racer_id,
                    tier,
                    source: e,
                });
            }
        };

        match self.sync.merge(&tier, racer_id, &details).await {
            Ok(_) => TickOutcome::Synced { racer_id, tier },
            Err(e) => {
                tracing::error!(racer_id, tier = %tier, error = %e, "Racer merge failed");
                TickOutcome::Failed(TickFailure::Merge {
                    racer_id,
                    tier,
                    source: e,
                })
            }
        }
    }
}

// ─── Background loop ─────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler interval must be greater than zero")]
    InvalidInterval,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_outcome: Option<TickReport>,
}

struct RunningLoop {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the optional background task that calls [`Scheduler::run_one_tick`]
/// on an interval.
pub struct SchedulerManager {
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    running: Mutex<Option<RunningLoop>>,
    status: Arc<Mutex<SchedulerStatus>>,
}

impl SchedulerManager {
    pub fn new(scheduler: Arc<Scheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler,
            clock,
            running: Mutex::new(None),
            status: Arc::new(Mutex::new(SchedulerStatus::default())),
        }
    }

    /// Start the loop. Returns false if it was already running.
    pub async fn start(&self, interval: Duration) -> Result<bool, SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Ok(false);
        }

        {
            let mut status = self.status.lock().await;
            status.running = true;
            status.interval_secs = Some(interval.as_secs());
            status.started_at = Some(self.clock.now());
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.scheduler.clone(),
            self.clock.clone(),
            self.status.clone(),
            interval,
            stop_rx,
        ));
        *running = Some(RunningLoop { stop_tx, handle });

        tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");
        Ok(true)
    }

    /// Stop the loop and wait for it to exit. Returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        let _ = running.stop_tx.send(true);
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }

        let mut status = self.status.lock().await;
        status.running = false;
        status.interval_secs = None;
        tracing::info!(run_count = status.run_count, "Scheduler stopped");
        true
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.lock().await.clone()
    }

    /// Run one tick now, outside the loop, and record it in the status.
    pub async fn tick_now(&self) -> TickReport {
        let outcome = self.scheduler.run_one_tick().await;
        record(&self.status, &outcome, self.clock.now()).await
    }
}

async fn record(
    status: &Mutex<SchedulerStatus>,
    outcome: &TickOutcome,
    at: DateTime<Utc>,
) -> TickReport {
    let report = outcome.report(at);
    let mut status = status.lock().await;
    status.last_run = Some(at);
    status.run_count += 1;
    status.last_outcome = Some(report.clone());
    report
}

async fn run_loop(
    scheduler: Arc<Scheduler>,
    clock: Arc<dyn Clock>,
    status: Arc<Mutex<SchedulerStatus>>,
    interval: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let outcome = tokio::select! {
            outcome = scheduler.run_one_tick() => outcome,
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
        };

        let pause = match &outcome {
            TickOutcome::NotDue { wait_hint, .. } => interval.max(*wait_hint),
            _ => interval,
        };
        record(&status, &outcome, clock.now()).await;

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
    status.lock().await.running = false;
}
