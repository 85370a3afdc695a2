// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scheduler control: single ticks and the background loop.

use crate::error::Result;
use crate::services::{SchedulerStatus, TickReport};
use crate::AppState;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scheduler/tick", post(run_tick))
        .route("/scheduler/start", post(start))
        .route("/scheduler/stop", post(stop))
        .route("/scheduler/status", get(status))
}

/// Run one tick now and report what it did.
async fn run_tick(State(state): State<Arc<AppState>>) -> Json<TickReport> {
    Json(state.scheduler_manager.tick_now().await)
}

#[derive(Deserialize, Validate)]
pub struct StartRequest {
    #[validate(range(min = 1, max = 86400))]
    pub interval_seconds: u64,
}

#[derive(Serialize)]
pub struct ControlResponse {
    /// False when the request was a no-op (already running or already stopped).
    pub changed: bool,
    pub status: SchedulerStatus,
}

async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<ControlResponse>> {
    req.validate()?;
    let changed = state
        .scheduler_manager
        .start(Duration::from_secs(req.interval_seconds))
        .await?;
    Ok(Json(ControlResponse {
        changed,
        status: state.scheduler_manager.status().await,
    }))
}

async fn stop(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    let changed = state.scheduler_manager.stop().await;
    Json(ControlResponse {
        changed,
        status: state.scheduler_manager.status().await,
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(state.scheduler_manager.status().await)
}
