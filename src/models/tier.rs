// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Polling tiers and their membership rows.

use crate::time_utils::non_negative;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named priority class with a minimum refresh interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tier {
    pub name: String,
    /// Zero means the tier has no minimum interval
    #[serde(rename = "min_interval_secs", serialize_with = "serialize_secs")]
    pub min_interval: Duration,
}

impl Tier {
    pub fn new(name: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            name: name.into(),
            min_interval,
        }
    }

    /// Time left before a member refreshed at `last_refreshed` is due again.
    ///
    /// Returns `None` when the member is already due.
    pub fn remaining(
        &self,
        last_refreshed: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        if self.min_interval.is_zero() {
            return None;
        }
        let last = last_refreshed?;
        // Clock skew can put `last` in the future; treat that as zero elapsed.
        let elapsed = non_negative(now - last);
        self.min_interval.checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Membership of a racer in a tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMember {
    pub tier: String,
    pub racer_id: u64,
    /// None means never refreshed (maximally stale)
    pub last_refreshed: Option<DateTime<Utc>>,
}
