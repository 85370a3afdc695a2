// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tier membership administration.

use crate::error::Result;
use crate::models::{Tier, TierMember};
use crate::services::PopulateReport;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tiers", get(list_tiers))
        .route("/tiers/populate", post(populate))
        .route("/tiers/{tier}/members", get(list_members).post(add_member))
        .route("/tiers/{tier}/members/{racer_id}", delete(remove_member))
        .route("/tiers/{tier}/members/{racer_id}/touch", post(touch_member))
}

async fn list_tiers(State(state): State<Arc<AppState>>) -> Json<Vec<Tier>> {
    Json(state.registry.list_tiers().to_vec())
}

#[derive(Serialize)]
pub struct MemberResponse {
    pub tier: String,
    pub racer_id: u64,
    pub last_refreshed: Option<String>,
}

impl From<TierMember> for MemberResponse {
    fn from(m: TierMember) -> Self {
        Self {
            tier: m.tier,
            racer_id: m.racer_id,
            last_refreshed: m.last_refreshed.map(format_utc_rfc3339),
        }
    }
}

async fn list_members(
    State(state): State<Arc<AppState>>,
    Path(tier): Path<String>,
) -> Result<Json<Vec<MemberResponse>>> {
    let members = state.registry.members(&tier).await?;
    Ok(Json(members.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize, Validate)]
pub struct AddMemberRequest {
    #[validate(range(min = 1))]
    pub racer_id: u64,
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(tier): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<StatusCode> {
    req.validate()?;
    if state.registry.add_member(&tier, req.racer_id).await? {
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::OK)
    }
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    Path((tier, racer_id)): Path<(String, u64)>,
) -> Result<StatusCode> {
    if state.registry.remove_member(&tier, racer_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(crate::error::AppError::NotFound(format!(
            "Racer {} is not a member of tier {}",
            racer_id, tier
        )))
    }
}

#[derive(Deserialize)]
pub struct TouchRequest {
    /// true: mark refreshed now. false: reset to never refreshed.
    pub to_now: bool,
}

async fn touch_member(
    State(state): State<Arc<AppState>>,
    Path((tier, racer_id)): Path<(String, u64)>,
    Json(req): Json<TouchRequest>,
) -> Result<StatusCode> {
    if req.to_now {
        state.registry.touch_member(&tier, racer_id).await?;
    } else {
        state.registry.reset_member(&tier, racer_id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct PopulateRequest {
    /// Defaults to the race of the first credential.
    pub race_id: Option<u64>,
}

async fn populate(
    State(state): State<Arc<AppState>>,
    body: Option<Json<PopulateRequest>>,
) -> Result<Json<PopulateReport>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(state.roster.populate(req.race_id).await?))
}
