// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Race Monitor credential administration. Tokens are never echoed back.

use crate::error::{AppError, Result};
use crate::models::Credential;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/credentials", get(list_credentials).post(create_credential))
        .route(
            "/credentials/{id}",
            put(update_credential).delete(delete_credential),
        )
}

#[derive(Serialize)]
pub struct CredentialResponse {
    pub id: u64,
    pub token: String,
    pub race_id: u64,
    pub last_used: Option<String>,
    pub updated_at: String,
}

impl From<Credential> for CredentialResponse {
    fn from(c: Credential) -> Self {
        Self {
            id: c.id,
            token: c.masked_token(),
            race_id: c.race_id,
            last_used: c.last_used.map(format_utc_rfc3339),
            updated_at: format_utc_rfc3339(c.updated_at),
        }
    }
}

async fn list_credentials(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CredentialResponse>>> {
    let credentials = state.credentials.list().await?;
    Ok(Json(credentials.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize, Validate)]
pub struct CreateCredentialRequest {
    #[validate(range(min = 1))]
    pub id: u64,
    #[validate(length(min = 1, max = 256))]
    pub token: String,
    #[validate(range(min = 1))]
    pub race_id: u64,
}

async fn create_credential(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialResponse>)> {
    req.validate()?;
    let token = clean_token(&req.token)?;
    let credential = state
        .credentials
        .create(req.id, token, req.race_id)
        .await?;
    Ok((StatusCode::CREATED, Json(credential.into())))
}

#[derive(Deserialize, Validate)]
pub struct UpdateCredentialRequest {
    #[validate(length(min = 1, max = 256))]
    pub token: String,
    #[validate(range(min = 1))]
    pub race_id: u64,
}

async fn update_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<UpdateCredentialRequest>,
) -> Result<Json<CredentialResponse>> {
    req.validate()?;
    let token = clean_token(&req.token)?;
    let credential = state
        .credentials
        .update(id, token, req.race_id)
        .await?;
    Ok(Json(credential.into()))
}

fn clean_token(token: &str) -> Result<String> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("token must not be blank".to_string()));
    }
    Ok(token.to_string())
}

async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode> {
    state.credentials.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
