// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Raw Race Monitor payloads.
//!
//! Upstream fields are loosely typed: numbers arrive as JSON numbers or as
//! numeric strings, and any field may be missing or null. Every field is
//! captured as an optional JSON value and normalised through the `lenient_*`
//! helpers, so a wrong-typed field degrades to its default instead of
//! failing the whole payload.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Competitor object as returned by `Live/GetRacer`, `Live/GetSession`
/// and `Results/CompetitorDetails`.
///
/// Live and results payloads name the id and class fields differently, and
/// some carry both spellings; read them through [`RawCompetitor::resolved_racer_id`]
/// and [`RawCompetitor::resolved_class_id`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCompetitor {
    #[serde(rename = "RacerID", default)]
    pub racer_id: Option<Value>,
    #[serde(rename = "ID", default)]
    pub id: Option<Value>,
    #[serde(rename = "RaceID", default)]
    pub race_id: Option<Value>,
    #[serde(rename = "Number", default)]
    pub number: Option<Value>,
    #[serde(rename = "Transponder", default)]
    pub transponder: Option<Value>,
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<Value>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<Value>,
    #[serde(rename = "Nationality", default)]
    pub nationality: Option<Value>,
    #[serde(rename = "AdditionalData", default)]
    pub additional_data: Option<Value>,
    #[serde(rename = "ClassID", default)]
    pub class_id: Option<Value>,
    #[serde(rename = "Category", default)]
    pub category: Option<Value>,
    #[serde(rename = "Position", default)]
    pub position: Option<Value>,
    #[serde(rename = "Laps", default)]
    pub laps: Option<Value>,
    #[serde(rename = "TotalTime", default)]
    pub total_time: Option<Value>,
    #[serde(rename = "BestPosition", default)]
    pub best_position: Option<Value>,
    #[serde(rename = "BestLap", default)]
    pub best_lap: Option<Value>,
    #[serde(rename = "BestLapTime", default)]
    pub best_lap_time: Option<Value>,
    #[serde(rename = "LastLapTime", default)]
    pub last_lap_time: Option<Value>,
    /// Only present on results payloads
    #[serde(rename = "LapTimes", default)]
    pub lap_times: Option<Vec<RawLap>>,
}

impl RawCompetitor {
    /// `RacerID`, falling back to `ID` when that is missing or zero.
    pub fn resolved_racer_id(&self) -> u64 {
        match lenient_u64(&self.racer_id) {
            0 => lenient_u64(&self.id),
            id => id,
        }
    }

    /// `ClassID`, falling back to `Category` when that is missing or zero.
    pub fn resolved_class_id(&self) -> i64 {
        match lenient_int(&self.class_id) {
            0 => lenient_int(&self.category),
            class => class,
        }
    }
}

/// One lap entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLap {
    #[serde(rename = "Lap", default)]
    pub lap: Option<Value>,
    #[serde(rename = "Position", default)]
    pub position: Option<Value>,
    #[serde(rename = "LapTime", default)]
    pub lap_time: Option<Value>,
    #[serde(rename = "FlagStatus", default)]
    pub flag_status: Option<Value>,
    #[serde(rename = "TotalTime", default)]
    pub total_time: Option<Value>,
}

/// Body of a successful `Live/GetRacer` response.
#[derive(Debug, Clone, Deserialize)]
pub struct RacerResponse {
    #[serde(rename = "Details")]
    pub details: RacerDetailsBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RacerDetailsBody {
    #[serde(rename = "Competitor")]
    pub competitor: RawCompetitor,
    #[serde(rename = "Laps", default)]
    pub laps: Option<Vec<RawLap>>,
}

/// Racer detail fetched for a specific race.
///
/// `race_id` is the race the fetching credential is scoped to, so the merge
/// writes under the same race the data was requested for.
#[derive(Debug, Clone)]
pub struct RacerDetails {
    pub race_id: u64,
    pub competitor: RawCompetitor,
    pub laps: Vec<RawLap>,
}

/// Body of a successful `Live/GetSession` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    #[serde(rename = "Session")]
    pub session: SessionBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionBody {
    /// Keyed by racer id
    #[serde(rename = "Competitors", default)]
    pub competitors: Option<HashMap<String, RawCompetitor>>,
}

/// Live session roster.
#[derive(Debug, Clone, Default)]
pub struct SessionRoster {
    pub race_id: u64,
    pub competitors: Vec<RawCompetitor>,
}

impl SessionRoster {
    /// Racer ids ordered by position; unparseable positions sort last,
    /// ties by racer id.
    pub fn ordered_racer_ids(&self) -> Vec<u64> {
        let mut entries: Vec<(i64, u64)> = self
            .competitors
            .iter()
            .map(|c| {
                (
                    lenient_int_or(&c.position, i64::MAX),
                    c.resolved_racer_id(),
                )
            })
            .filter(|(_, id)| *id > 0)
            .collect();
        entries.sort();
        let mut seen = HashSet::new();
        entries
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// Body of a successful `Results/SessionDetails` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsSessionResponse {
    #[serde(rename = "Session", default)]
    pub session: Option<ResultsSessionBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsSessionBody {
    #[serde(rename = "SortedCompetitors", default)]
    pub sorted_competitors: Option<Vec<RawCompetitor>>,
}

/// Body of a successful `Results/CompetitorDetails` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsCompetitorResponse {
    #[serde(rename = "Competitor", default)]
    pub competitor: Option<RawCompetitor>,
}

// ─── Lenient field conversion ─────────────────────────────────────────

/// Integer from a JSON number or numeric string, else `default`.
pub fn lenient_int_or(value: &Option<Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Integer field defaulting to zero.
pub fn lenient_int(value: &Option<Value>) -> i64 {
    lenient_int_or(value, 0)
}

/// Identifier field; negative or unparseable values become zero.
pub fn lenient_u64(value: &Option<Value>) -> u64 {
    u64::try_from(lenient_int(value)).unwrap_or(0)
}

/// String field defaulting to empty. Scalars are rendered as text.
pub fn lenient_string(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}
