// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Competitor and lap records for storage and API.

use crate::models::payload::{lenient_int, lenient_int_or, lenient_string, RawCompetitor, RawLap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored in place of a duration that could not be parsed.
pub const UNKNOWN_DURATION_MS: i64 = -1;

/// Competitor state within one race.
///
/// Keyed by (race_id, racer_id). Descriptive fields are fixed when the record
/// is first created; standings fields are overwritten on every merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorRecord {
    pub race_id: u64,
    pub racer_id: u64,

    // ─── Set once on creation ────────────────────────────────────
    pub number: String,
    pub transponder: String,
    pub first_name: String,
    pub last_name: String,
    pub nationality: String,
    pub additional_data: String,
    pub class_id: i64,

    // ─── Last write wins ─────────────────────────────────────────
    pub position: i64,
    pub laps_completed: i64,
    pub total_time_ms: i64,
    pub best_position: i64,
    pub best_lap: i64,
    pub best_lap_time_ms: i64,
    pub last_lap_time_ms: i64,
    pub updated_at: DateTime<Utc>,
}

impl CompetitorRecord {
    /// Normalise a raw upstream competitor.
    pub fn from_raw(race_id: u64, raw: &RawCompetitor, now: DateTime<Utc>) -> Self {
        Self {
            race_id,
            racer_id: raw.resolved_racer_id(),
            number: lenient_string(&raw.number),
            transponder: lenient_string(&raw.transponder),
            first_name: lenient_string(&raw.first_name),
            last_name: lenient_string(&raw.last_name),
            nationality: lenient_string(&raw.nationality),
            additional_data: lenient_string(&raw.additional_data),
            class_id: raw.resolved_class_id(),
            position: lenient_int(&raw.position),
            laps_completed: lenient_int(&raw.laps),
            total_time_ms: duration_field_ms(&raw.total_time),
            best_position: lenient_int(&raw.best_position),
            best_lap: lenient_int(&raw.best_lap),
            best_lap_time_ms: duration_field_ms(&raw.best_lap_time),
            last_lap_time_ms: duration_field_ms(&raw.last_lap_time),
            updated_at: now,
        }
    }

    /// Storage document id.
    pub fn doc_id(&self) -> String {
        competitor_doc_id(self.race_id, self.racer_id)
    }

    /// Overwrite the standings fields from a newer observation.
    pub fn apply_update(&mut self, incoming: &CompetitorRecord) {
        self.position = incoming.position;
        self.laps_completed = incoming.laps_completed;
        self.total_time_ms = incoming.total_time_ms;
        self.best_position = incoming.best_position;
        self.best_lap = incoming.best_lap;
        self.best_lap_time_ms = incoming.best_lap_time_ms;
        self.last_lap_time_ms = incoming.last_lap_time_ms;
        self.updated_at = incoming.updated_at;
    }
}

/// One completed lap. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapRecord {
    pub race_id: u64,
    pub racer_id: u64,
    pub lap_number: i64,
    pub position: i64,
    pub lap_time_ms: i64,
    pub flag_status: String,
    pub total_time_ms: i64,
}

impl LapRecord {
    /// Normalise a raw upstream lap. Laps without a usable lap number have
    /// no identity and are rejected.
    pub fn from_raw(race_id: u64, racer_id: u64, raw: &RawLap) -> Option<Self> {
        let lap_number = lenient_int_or(&raw.lap, -1);
        if lap_number < 0 {
            return None;
        }
        Some(Self {
            race_id,
            racer_id,
            lap_number,
            position: lenient_int(&raw.position),
            lap_time_ms: duration_field_ms(&raw.lap_time),
            flag_status: lenient_string(&raw.flag_status),
            total_time_ms: duration_field_ms(&raw.total_time),
        })
    }

    /// Storage document id.
    pub fn doc_id(&self) -> String {
        format!("{}_{}_{}", self.race_id, self.racer_id, self.lap_number)
    }
}

pub fn competitor_doc_id(race_id: u64, racer_id: u64) -> String {
    format!("{}_{}", race_id, racer_id)
}

/// Normalise a duration field to milliseconds.
///
/// Missing, null or blank fields count as zero; anything else that does not
/// parse becomes [`UNKNOWN_DURATION_MS`].
pub fn duration_field_ms(value: &Option<Value>) -> i64 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) if s.trim().is_empty() => 0,
        Some(Value::String(s)) => parse_duration_ms(s).unwrap_or(UNKNOWN_DURATION_MS),
        Some(_) => UNKNOWN_DURATION_MS,
    }
}

/// Parse `m:ss.fff` or `h:mm:ss.fff` into milliseconds.
///
/// The fraction is optional and read as milliseconds (`.5` is 500 ms, digits
/// past the third are dropped).
pub fn parse_duration_ms(text: &str) -> Option<i64> {
    let text = text.trim();
    let parts: Vec<&str> = text.split(':').collect();
    let (hours, minutes, rest) = match parts.as_slice() {
        [m, rest] => ("0", *m, *rest),
        [h, m, rest] => (*h, *m, *rest),
        _ => return None,
    };

    let (seconds, fraction) = rest.split_once('.').unwrap_or((rest, "0"));

    let hours = parse_digits(hours)?;
    let minutes = parse_digits(minutes)?;
    let seconds = parse_digits(seconds)?;
    if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut padded: String = fraction.chars().take(3).collect();
    while padded.len() < 3 {
        padded.push('0');
    }
    let millis = parse_digits(&padded)?;

    hours
        .checked_mul(3_600_000)?
        .checked_add(minutes.checked_mul(60_000)?)?
        .checked_add(seconds.checked_mul(1_000)?)?
        .checked_add(millis)
}

fn parse_digits(s: &str) -> Option<i64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
