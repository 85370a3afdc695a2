// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer.
//!
//! The scheduling core only needs single-document reads, upserts,
//! insert-if-absent and updates, expressed as the three store traits below.
//! [`FirestoreDb`] is the production backend; [`MemoryDb`] backs tests and
//! local runs.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::models::{CompetitorRecord, Credential, LapRecord, TierMember};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Collection names as constants.
pub mod collections {
    pub const CREDENTIALS: &str = "credentials";
    pub const TIER_MEMBERS: &str = "tier_members";
    pub const COMPETITORS: &str = "competitors";
    pub const COMPETITOR_LAPS: &str = "competitor_laps";
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database not connected (offline mode)")]
    Offline,

    #[error("Database error: {0}")]
    Backend(String),
}

/// Whether an upsert created or updated the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// API credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list_credentials(&self) -> Result<Vec<Credential>, StoreError>;

    async fn get_credential(&self, id: u64) -> Result<Option<Credential>, StoreError>;

    /// Create or replace a credential.
    async fn put_credential(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Returns false if the credential did not exist.
    async fn delete_credential(&self, id: u64) -> Result<bool, StoreError>;

    /// Single-field write of `last_used`. Returns false if the credential is gone.
    async fn set_last_used(&self, id: u64, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Tier membership rows.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Member with the smallest `last_refreshed` (never-refreshed first),
    /// ties broken by smallest racer id.
    async fn oldest_member(&self, tier: &str) -> Result<Option<TierMember>, StoreError>;

    /// Members ordered by racer id.
    async fn list_members(&self, tier: &str) -> Result<Vec<TierMember>, StoreError>;

    /// Insert with `last_refreshed = None`. Returns false if already present.
    async fn add_member(&self, tier: &str, racer_id: u64) -> Result<bool, StoreError>;

    /// Returns false if the member did not exist.
    async fn remove_member(&self, tier: &str, racer_id: u64) -> Result<bool, StoreError>;

    /// Set `last_refreshed` to `at` unless the stored value is already later.
    /// Returns false if the member does not exist.
    async fn advance_last_refreshed(
        &self,
        tier: &str,
        racer_id: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Unconditionally overwrite `last_refreshed`. Returns false if the member
    /// does not exist.
    async fn set_last_refreshed(
        &self,
        tier: &str,
        racer_id: u64,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Replace every member of `tier` with `racer_ids`, all never refreshed.
    async fn replace_members(&self, tier: &str, racer_ids: &[u64]) -> Result<(), StoreError>;
}

/// Competitor records and lap history.
#[async_trait]
pub trait RaceStore: Send + Sync {
    /// Insert, or overwrite the standings fields of an existing record
    /// (see [`CompetitorRecord::apply_update`]).
    async fn upsert_competitor(
        &self,
        record: &CompetitorRecord,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn get_competitor(
        &self,
        race_id: u64,
        racer_id: u64,
    ) -> Result<Option<CompetitorRecord>, StoreError>;

    /// Insert a lap unless its key is already present.
    /// Returns true if it was inserted.
    async fn insert_lap_if_absent(&self, lap: &LapRecord) -> Result<bool, StoreError>;

    /// Insert-if-absent for each lap; one result per input, in input order.
    async fn insert_laps(&self, laps: &[LapRecord]) -> Vec<Result<bool, StoreError>> {
        let mut results = Vec::with_capacity(laps.len());
        for lap in laps {
            results.push(self.insert_lap_if_absent(lap).await);
        }
        results
    }

    /// Laps ordered by lap number.
    async fn list_laps(&self, race_id: u64, racer_id: u64) -> Result<Vec<LapRecord>, StoreError>;
}

/// Document id for a tier member row.
pub fn tier_member_doc_id(tier: &str, racer_id: u64) -> String {
    format!("{}_{}", urlencoding::encode(tier), racer_id)
}
