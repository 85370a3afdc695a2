// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API credential rotation.
//!
//! Every outbound call uses the least recently used credential and stamps it
//! before dispatch, so concurrent schedulers (even in other processes) see
//! the updated ordering as early as possible. This is advisory fairness, not
//! a lock: two racing ticks may still pick the same credential.

use crate::db::{CredentialStore, StoreError};
use crate::models::Credential;
use crate::staleness::oldest_by;
use crate::time_utils::Clock;
use std::sync::Arc;

/// Credential pool errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No API credentials available")]
    NoCredentialsAvailable,

    #[error("Credential {0} not found")]
    NotFound(u64),

    #[error("Credential {0} already exists")]
    AlreadyExists(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pool of Race Monitor credentials.
pub struct CredentialPool {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The least recently used usable credential; ties go to the lowest id.
    pub async fn acquire(&self) -> Result<Credential, CredentialError> {
        let credentials = self.store.list_credentials().await?;
        oldest_by(
            credentials.into_iter().filter(Credential::is_usable),
            |c| (c.last_used, c.id),
        )
        .ok_or(CredentialError::NoCredentialsAvailable)
    }

    /// Stamp a credential as used now.
    pub async fn mark_used(&self, id: u64) -> Result<(), CredentialError> {
        if self.store.set_last_used(id, self.clock.now()).await? {
            Ok(())
        } else {
            Err(CredentialError::NotFound(id))
        }
    }

    /// Acquire and immediately mark used, as one logical step.
    pub async fn acquire_and_mark(&self) -> Result<Credential, CredentialError> {
        let mut credential = self.acquire().await?;
        let now = self.clock.now();
        if !self.store.set_last_used(credential.id, now).await? {
            // Deleted between the read and the stamp; the token is still valid
            // for this one call.
            tracing::warn!(
                credential_id = credential.id,
                "Credential vanished before it could be marked used"
            );
        }
        credential.last_used = Some(now);
        Ok(credential)
    }

    /// Race of the lowest-id usable credential, used as the default race.
    pub async fn default_race_id(&self) -> Result<u64, CredentialError> {
        self.store
            .list_credentials()
            .await?
            .into_iter()
            .filter(Credential::is_usable)
            .min_by_key(|c| c.id)
            .map(|c| c.race_id)
            .ok_or(CredentialError::NoCredentialsAvailable)
    }

    // ─── Administration ──────────────────────────────────────────────────

    pub async fn list(&self) -> Result<Vec<Credential>, CredentialError> {
        Ok(self.store.list_credentials().await?)
    }

    /// Add a new credential. It starts as never used.
    pub async fn create(
        &self,
        id: u64,
        token: String,
        race_id: u64,
    ) -> Result<Credential, CredentialError> {
        if self.store.get_credential(id).await?.is_some() {
            return Err(CredentialError::AlreadyExists(id));
        }
        let credential = Credential {
            id,
            token,
            race_id,
            last_used: None,
            updated_at: self.clock.now(),
        };
        self.store.put_credential(&credential).await?;
        tracing::info!(
            credential_id = id,
            race_id,
            token = %credential.masked_token(),
            "Credential created"
        );
        Ok(credential)
    }

    /// Replace the token and race of an existing credential, keeping its
    /// usage history.
    pub async fn update(
        &self,
        id: u64,
        token: String,
        race_id: u64,
    ) -> Result<Credential, CredentialError> {
        let mut credential = self
            .store
            .get_credential(id)
            .await?
            .ok_or(CredentialError::NotFound(id))?;
        credential.token = token;
        credential.race_id = race_id;
        credential.updated_at = self.clock.now();
        self.store.put_credential(&credential).await?;
        tracing::info!(credential_id = id, race_id, "Credential updated");
        Ok(credential)
    }

    pub async fn delete(&self, id: u64) -> Result<(), CredentialError> {
        if !self.store.delete_credential(id).await? {
            return Err(CredentialError::NotFound(id));
        }
        tracing::info!(credential_id = id, "Credential deleted");
        Ok(())
    }
}
