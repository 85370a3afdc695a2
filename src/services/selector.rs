// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Poll selection: which racer to refresh on this tick.
//!
//! The globally stalest member across all tiers is chosen, not a round-robin
//! per tier. Any member therefore gets refreshed once it becomes the global
//! oldest, and zero-interval tiers soak up whatever budget is left.

use crate::models::TierMember;
use crate::services::tiers::{RegistryError, TierRegistry};
use crate::staleness::oldest_by;
use crate::time_utils::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Result of a selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every tier is empty.
    NoCandidates,
    /// The stalest candidate's tier interval has not elapsed yet.
    NotDue {
        racer_id: u64,
        tier: String,
        wait_hint: Duration,
    },
    Due { racer_id: u64, tier: String },
}

/// Stalest of the per-tier candidates.
///
/// Candidates must be in tier configuration order: ties on timestamp go to
/// the smallest racer id, and a racer present in two tiers goes to the
/// earlier tier.
pub fn pick_stalest<I>(candidates: I) -> Option<TierMember>
where
    I: IntoIterator<Item = TierMember>,
{
    oldest_by(candidates, |m| (m.last_refreshed, m.racer_id))
}

pub struct PollSelector {
    registry: Arc<TierRegistry>,
    clock: Arc<dyn Clock>,
    min_tick: Duration,
}

impl PollSelector {
    pub fn new(registry: Arc<TierRegistry>, clock: Arc<dyn Clock>, min_tick: Duration) -> Self {
        Self {
            registry,
            clock,
            min_tick,
        }
    }

    pub async fn select(&self) -> Result<Selection, RegistryError> {
        let mut candidates = Vec::with_capacity(self.registry.list_tiers().len());
        for tier in self.registry.list_tiers() {
            if let Some(member) = self.registry.oldest_in_tier(&tier.name).await? {
                candidates.push(member);
            }
        }

        let Some(chosen) = pick_stalest(candidates) else {
            return Ok(Selection::NoCandidates);
        };

        let tier = self.registry.tier(&chosen.tier)?;
        match tier.remaining(chosen.last_refreshed, self.clock.now()) {
            Some(remaining) => Ok(Selection::NotDue {
                racer_id: chosen.racer_id,
                tier: chosen.tier,
                wait_hint: remaining.max(self.min_tick),
            }),
            None => Ok(Selection::Due {
                racer_id: chosen.racer_id,
                tier: chosen.tier,
            }),
        }
    }
}
