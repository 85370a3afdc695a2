// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory store for tests and local runs.
//!
//! Each map entry is guarded by its `DashMap` shard lock, so single-record
//! operations are atomic just like single-document writes in Firestore.

use crate::db::{CredentialStore, RaceStore, StoreError, TierStore, UpsertOutcome};
use crate::models::{CompetitorRecord, Credential, LapRecord, TierMember};
use crate::staleness::oldest_by;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory database.
#[derive(Debug, Default)]
pub struct MemoryDb {
    credentials: DashMap<u64, Credential>,
    tier_members: DashMap<(String, u64), TierMember>,
    competitors: DashMap<(u64, u64), CompetitorRecord>,
    laps: DashMap<(u64, u64, i64), LapRecord>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total lap rows across all races.
    pub fn lap_count(&self) -> usize {
        self.laps.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryDb {
    async fn list_credentials(&self) -> Result<Vec<Credential>, StoreError> {
        let mut creds: Vec<Credential> = self.credentials.iter().map(|e| e.clone()).collect();
        creds.sort_by_key(|c| c.id);
        Ok(creds)
    }

    async fn get_credential(&self, id: u64) -> Result<Option<Credential>, StoreError> {
        Ok(self.credentials.get(&id).map(|c| c.clone()))
    }

    async fn put_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        self.credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.credentials.remove(&id).is_some())
    }

    async fn set_last_used(&self, id: u64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.credentials.get_mut(&id) {
            Some(mut cred) => {
                cred.last_used = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TierStore for MemoryDb {
    async fn oldest_member(&self, tier: &str) -> Result<Option<TierMember>, StoreError> {
        let members = self
            .tier_members
            .iter()
            .filter(|e| e.key().0 == tier)
            .map(|e| e.value().clone());
        Ok(oldest_by(members, |m| (m.last_refreshed, m.racer_id)))
    }

    async fn list_members(&self, tier: &str) -> Result<Vec<TierMember>, StoreError> {
        let mut members: Vec<TierMember> = self
            .tier_members
            .iter()
            .filter(|e| e.key().0 == tier)
            .map(|e| e.value().clone())
            .collect();
        members.sort_by_key(|m| m.racer_id);
        Ok(members)
    }

    async fn add_member(&self, tier: &str, racer_id: u64) -> Result<bool, StoreError> {
        match self.tier_members.entry((tier.to_string(), racer_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(TierMember {
                    tier: tier.to_string(),
                    racer_id,
                    last_refreshed: None,
                });
                Ok(true)
            }
        }
    }

    async fn remove_member(&self, tier: &str, racer_id: u64) -> Result<bool, StoreError> {
        Ok(self
            .tier_members
            .remove(&(tier.to_string(), racer_id))
            .is_some())
    }

    async fn advance_last_refreshed(
        &self,
        tier: &str,
        racer_id: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.tier_members.get_mut(&(tier.to_string(), racer_id)) {
            Some(mut member) => {
                if member.last_refreshed.is_none_or(|prev| prev < at) {
                    member.last_refreshed = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_last_refreshed(
        &self,
        tier: &str,
        racer_id: u64,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        match self.tier_members.get_mut(&(tier.to_string(), racer_id)) {
            Some(mut member) => {
                member.last_refreshed = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_members(&self, tier: &str, racer_ids: &[u64]) -> Result<(), StoreError> {
        self.tier_members.retain(|(t, _), _| t != tier);
        for &racer_id in racer_ids {
            self.tier_members.insert(
                (tier.to_string(), racer_id),
                TierMember {
                    tier: tier.to_string(),
                    racer_id,
                    last_refreshed: None,
                },
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RaceStore for MemoryDb {
    async fn upsert_competitor(
        &self,
        record: &CompetitorRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        match self.competitors.entry((record.race_id, record.racer_id)) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().apply_update(record);
                Ok(UpsertOutcome::Updated)
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get_competitor(
        &self,
        race_id: u64,
        racer_id: u64,
    ) -> Result<Option<CompetitorRecord>, StoreError> {
        Ok(self.competitors.get(&(race_id, racer_id)).map(|r| r.clone()))
    }

    async fn insert_lap_if_absent(&self, lap: &LapRecord) -> Result<bool, StoreError> {
        match self
            .laps
            .entry((lap.race_id, lap.racer_id, lap.lap_number))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(lap.clone());
                Ok(true)
            }
        }
    }

    async fn list_laps(&self, race_id: u64, racer_id: u64) -> Result<Vec<LapRecord>, StoreError> {
        let mut laps: Vec<LapRecord> = self
            .laps
            .iter()
            .filter(|e| e.race_id == race_id && e.racer_id == racer_id)
            .map(|e| e.value().clone())
            .collect();
        laps.sort_by_key(|l| l.lap_number);
        Ok(laps)
    }
}
