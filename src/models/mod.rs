// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credential;
pub mod payload;
pub mod race;
pub mod tier;

pub use credential::Credential;
pub use payload::{RacerDetails, SessionRoster};
pub use race::{CompetitorRecord, LapRecord, UNKNOWN_DURATION_MS};
pub use tier::{Tier, TierMember};
