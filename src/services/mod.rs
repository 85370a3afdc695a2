// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Business logic services.

pub mod credentials;
pub mod race_monitor;
pub mod rate_limit;
pub mod results;
pub mod roster;
pub mod scheduler;
pub mod selector;
pub mod sync;
pub mod tiers;

pub use credentials::{CredentialError, CredentialPool};
pub use race_monitor::{HttpUpstream, TelemetryClient, TelemetryError, Upstream, UpstreamResponse};
pub use rate_limit::RateLimiter;
pub use results::{IngestReport, ResultsIngestor};
pub use roster::{PopulateReport, RosterError, RosterLayout, RosterPopulator};
pub use scheduler::{
    Scheduler, SchedulerError, SchedulerManager, SchedulerStatus, TickFailure, TickOutcome,
    TickReport,
};
pub use selector::{PollSelector, Selection};
pub use sync::{MergeReport, SyncEngine, SyncError};
pub use tiers::{RegistryError, TierRegistry};
