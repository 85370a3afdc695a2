// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Finished-session backfill.

use crate::error::Result;
use crate::services::IngestReport;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/results/{session_id}/ingest", post(ingest_session))
}

async fn ingest_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<u64>,
) -> Result<Json<IngestReport>> {
    Ok(Json(state.results.ingest_session(session_id).await?))
}
