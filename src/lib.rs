// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Lap-Tracker: tiered polling of Race Monitor live timing
//!
//! This crate keeps competitor standings and lap history current for a race
//! by polling a rate-limited API, refreshing front-runners more often than
//! the rest of the field.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod staleness;
pub mod time_utils;

use config::Config;
use db::{CredentialStore, FirestoreDb, MemoryDb, RaceStore, TierStore};
use services::{
    CredentialPool, PollSelector, RateLimiter, ResultsIngestor, RosterLayout, RosterPopulator,
    Scheduler, SchedulerManager, SyncEngine, TelemetryClient, TierRegistry, Upstream,
};
use std::sync::Arc;
use time_utils::Clock;

/// Storage backends, one handle per concern.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub tiers: Arc<dyn TierStore>,
    pub races: Arc<dyn RaceStore>,
}

impl Stores {
    pub fn memory(db: Arc<MemoryDb>) -> Self {
        Self {
            credentials: db.clone(),
            tiers: db.clone(),
            races: db,
        }
    }

    pub fn firestore(db: FirestoreDb) -> Self {
        let db = Arc::new(db);
        Self {
            credentials: db.clone(),
            tiers: db.clone(),
            races: db,
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub credentials: Arc<CredentialPool>,
    pub registry: Arc<TierRegistry>,
    pub telemetry: Arc<TelemetryClient>,
    pub scheduler: Arc<Scheduler>,
    pub scheduler_manager: SchedulerManager,
    pub roster: RosterPopulator,
    pub results: ResultsIngestor,
}

impl AppState {
    /// Wire every component once. Nothing here is a global; the rate limiter
    /// window in particular is shared only by the ticks of this process.
    pub fn new(
        config: Config,
        stores: Stores,
        upstream: Arc<dyn Upstream>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credentials = Arc::new(CredentialPool::new(stores.credentials, clock.clone()));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_calls,
            config.rate_limit_window,
        ));
        let telemetry = Arc::new(TelemetryClient::new(
            upstream,
            credentials.clone(),
            limiter,
            config.request_timeout,
        ));
        let registry = Arc::new(TierRegistry::new(
            config.tiers.clone(),
            stores.tiers,
            clock.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(
            stores.races,
            registry.clone(),
            clock.clone(),
        ));

        let selector = PollSelector::new(registry.clone(), clock.clone(), config.min_tick);
        let scheduler = Arc::new(Scheduler::new(selector, telemetry.clone(), sync.clone()));
        let scheduler_manager = SchedulerManager::new(scheduler.clone(), clock);

        let roster = RosterPopulator::new(
            telemetry.clone(),
            credentials.clone(),
            registry.clone(),
            RosterLayout {
                pinned_tier: config.pinned_tier.clone(),
                top_tier: config.roster_top_tier.clone(),
                rest_tier: config.roster_rest_tier.clone(),
                top_count: config.roster_top_count,
            },
        );
        let results = ResultsIngestor::new(telemetry.clone(), sync);

        Self {
            config,
            credentials,
            registry,
            telemetry,
            scheduler,
            scheduler_manager,
            roster,
            results,
        }
    }
}
