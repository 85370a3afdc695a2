// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Regroup a race's racers into tiers from the live standings.
//!
//! The leading racers go into the top tier and everyone else into the rest
//! tier. Racers an operator has pinned into the pinned tier are left alone.

use crate::services::credentials::{CredentialError, CredentialPool};
use crate::services::race_monitor::{TelemetryClient, TelemetryError};
use crate::services::tiers::{RegistryError, TierRegistry};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Tier names and sizing for roster population.
#[derive(Debug, Clone)]
pub struct RosterLayout {
    pub pinned_tier: String,
    pub top_tier: String,
    pub rest_tier: String,
    pub top_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    pub race_id: u64,
    pub top_tier: String,
    pub top: Vec<u64>,
    pub rest_tier: String,
    pub rest: Vec<u64>,
    /// Roster entries left out because they are pinned.
    pub pinned_skipped: usize,
}

pub struct RosterPopulator {
    telemetry: Arc<TelemetryClient>,
    credentials: Arc<CredentialPool>,
    registry: Arc<TierRegistry>,
    layout: RosterLayout,
}

impl RosterPopulator {
    pub fn new(
        telemetry: Arc<TelemetryClient>,
        credentials: Arc<CredentialPool>,
        registry: Arc<TierRegistry>,
        layout: RosterLayout,
    ) -> Self {
        Self {
            telemetry,
            credentials,
            registry,
            layout,
        }
    }

    /// Rebuild the top and rest tiers. Defaults to the race of the first
    /// configured credential.
    pub async fn populate(&self, race_id: Option<u64>) -> Result<PopulateReport, RosterError> {
        let race_id = match race_id {
            Some(id) => id,
            None => self.credentials.default_race_id().await?,
        };

        let roster = self.telemetry.fetch_session(race_id).await?;
        let pinned: HashSet<u64> = self
            .registry
            .members(&self.layout.pinned_tier)
            .await?
            .into_iter()
            .map(|m| m.racer_id)
            .collect();

        let ordered = roster.ordered_racer_ids();
        let total = ordered.len();
        let mut rest: Vec<u64> = ordered
            .into_iter()
            .filter(|id| !pinned.contains(id))
            .collect();
        let pinned_skipped = total - rest.len();
        let split = self.layout.top_count.min(rest.len());
        let top: Vec<u64> = rest.drain(..split).collect();

        self.registry
            .replace_members(&self.layout.top_tier, &top)
            .await?;
        self.registry
            .replace_members(&self.layout.rest_tier, &rest)
            .await?;

        tracing::info!(
            race_id,
            top = top.len(),
            rest = rest.len(),
            pinned_skipped,
            "Tiers populated from session roster"
        );

        Ok(PopulateReport {
            race_id,
            top_tier: self.layout.top_tier.clone(),
            top,
            rest_tier: self.layout.rest_tier.clone(),
            rest,
            pinned_skipped,
        })
    }
}
