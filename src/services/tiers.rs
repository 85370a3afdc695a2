// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tier registry: static tier configuration plus membership rows in the store.

use crate::db::{StoreError, TierStore};
use crate::models::{Tier, TierMember};
use crate::time_utils::Clock;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Racer {racer_id} is not a member of tier {tier}")]
    NotAMember { tier: String, racer_id: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TierRegistry {
    tiers: Vec<Tier>,
    store: Arc<dyn TierStore>,
    clock: Arc<dyn Clock>,
}

impl TierRegistry {
    pub fn new(tiers: Vec<Tier>, store: Arc<dyn TierStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tiers,
            store,
            clock,
        }
    }

    /// Tiers in configuration order.
    pub fn list_tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn tier(&self, name: &str) -> Result<&Tier, RegistryError> {
        self.tiers
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| RegistryError::UnknownTier(name.to_string()))
    }

    /// Stalest member of a tier (never refreshed first, then smallest racer id).
    pub async fn oldest_in_tier(&self, tier: &str) -> Result<Option<TierMember>, RegistryError> {
        self.tier(tier)?;
        Ok(self.store.oldest_member(tier).await?)
    }

    /// Mark a member refreshed now. The timestamp never moves backwards.
    ///
    /// Returns false if the member was removed in the meantime.
    pub async fn touch(&self, tier: &str, racer_id: u64) -> Result<bool, RegistryError> {
        self.tier(tier)?;
        let touched = self
            .store
            .advance_last_refreshed(tier, racer_id, self.clock.now())
            .await?;
        if !touched {
            tracing::warn!(tier, racer_id, "Touch on a member that no longer exists");
        }
        Ok(touched)
    }

    /// Administrative touch-to-now; fails for non-members.
    pub async fn touch_member(&self, tier: &str, racer_id: u64) -> Result<(), RegistryError> {
        if self.touch(tier, racer_id).await? {
            Ok(())
        } else {
            Err(RegistryError::NotAMember {
                tier: tier.to_string(),
                racer_id,
            })
        }
    }

    /// Administrative touch-to-null: the member becomes maximally stale.
    pub async fn reset_member(&self, tier: &str, racer_id: u64) -> Result<(), RegistryError> {
        self.tier(tier)?;
        if self.store.set_last_refreshed(tier, racer_id, None).await? {
            tracing::info!(tier, racer_id, "Tier member reset to never refreshed");
            Ok(())
        } else {
            Err(RegistryError::NotAMember {
                tier: tier.to_string(),
                racer_id,
            })
        }
    }

    /// Idempotent. Returns true if the member was newly added.
    pub async fn add_member(&self, tier: &str, racer_id: u64) -> Result<bool, RegistryError> {
        self.tier(tier)?;
        let added = self.store.add_member(tier, racer_id).await?;
        if added {
            tracing::info!(tier, racer_id, "Added tier member");
        }
        Ok(added)
    }

    /// Returns true if a member was removed.
    pub async fn remove_member(&self, tier: &str, racer_id: u64) -> Result<bool, RegistryError> {
        self.tier(tier)?;
        let removed = self.store.remove_member(tier, racer_id).await?;
        if removed {
            tracing::info!(tier, racer_id, "Removed tier member");
        }
        Ok(removed)
    }

    pub async fn members(&self, tier: &str) -> Result<Vec<TierMember>, RegistryError> {
        self.tier(tier)?;
        Ok(self.store.list_members(tier).await?)
    }

    /// Replace a tier's membership wholesale; every new row starts never refreshed.
    pub async fn replace_members(&self, tier: &str, racer_ids: &[u64]) -> Result<(), RegistryError> {
        self.tier(tier)?;
        self.store.replace_members(tier, racer_ids).await?;
        tracing::info!(tier, count = racer_ids.len(), "Replaced tier members");
        Ok(())
    }
}
