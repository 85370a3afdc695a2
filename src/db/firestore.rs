// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides the store traits over four collections:
//! - `credentials` (API tokens, keyed by id)
//! - `tier_members` (keyed by `{tier}_{racer_id}`)
//! - `competitors` (keyed by `{race_id}_{racer_id}`)
//! - `competitor_laps` (keyed by `{race_id}_{racer_id}_{lap_number}`)
//!
//! Timestamps that drive ordering are stored as native Firestore timestamps;
//! a never-refreshed member stores `null`, which Firestore sorts before any
//! timestamp.
//!
//! Read-modify-write paths (touches, credential use, competitor updates) run
//! inside `run_transaction`. The read registers the document for conflict
//! detection, so a concurrent write or delete forces a retry against fresh
//! data, and a document deleted meanwhile is never recreated.

use crate::db::{
    collections, tier_member_doc_id, CredentialStore, RaceStore, StoreError, TierStore,
    UpsertOutcome,
};
use crate::models::race::competitor_doc_id;
use crate::models::{CompetitorRecord, Credential, LapRecord, TierMember};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::errors::{BackoffError, FirestoreError};
use firestore::{FirestoreQueryDirection, FirestoreTransaction, FirestoreWritePrecondition};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};

const MAX_CONCURRENT_DB_OPS: usize = 50;

type TxResult<T> = Result<T, BackoffError<FirestoreError>>;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, StoreError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, StoreError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            StoreError::Backend(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, StoreError> {
        self.client.as_ref().ok_or(StoreError::Offline)
    }

    async fn get_member_doc(
        &self,
        tier: &str,
        racer_id: u64,
    ) -> Result<Option<TierMemberDoc>, StoreError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::TIER_MEMBERS)
            .obj()
            .one(&tier_member_doc_id(tier, racer_id))
            .await
            .map_err(db_err)
    }

    /// Apply `update` to an existing member row. Returns `false` when the
    /// row does not exist; a missing row is never recreated.
    async fn refresh_member(
        &self,
        tier: &str,
        racer_id: u64,
        update: RefreshUpdate,
    ) -> Result<bool, StoreError> {
        let doc_id = tier_member_doc_id(tier, racer_id);
        self.get_client()?
            .run_transaction(move |db, transaction| {
                Box::pin(refresh_member_in_tx(db, transaction, doc_id.clone(), update))
            })
            .await
            .map_err(db_err)
    }
}

/// How a touch changes `last_refreshed`.
#[derive(Debug, Clone, Copy)]
enum RefreshUpdate {
    /// Forward only: an equal or later stored value is kept.
    Advance(DateTime<Utc>),
    Set(Option<DateTime<Utc>>),
}

impl RefreshUpdate {
    /// The value to write, or `None` when the stored row already satisfies it.
    fn next(self, prev: Option<DateTime<Utc>>) -> Option<Option<DateTime<Utc>>> {
        match self {
            Self::Advance(at) if prev.is_some_and(|p| p >= at) => None,
            Self::Advance(at) => Some(Some(at)),
            Self::Set(at) => Some(at),
        }
    }
}

async fn refresh_member_in_tx(
    db: firestore::FirestoreDb,
    transaction: &mut FirestoreTransaction<'_>,
    doc_id: String,
    update: RefreshUpdate,
) -> TxResult<bool> {
    let Some(mut doc) = db
        .fluent()
        .select()
        .by_id_in(collections::TIER_MEMBERS)
        .obj::<TierMemberDoc>()
        .one(&doc_id)
        .await?
    else {
        return Ok(false);
    };

    if let Some(next) = update.next(doc.last_refreshed) {
        doc.last_refreshed = next;
        db.fluent()
            .update()
            .fields([firestore::path!(TierMemberDoc::last_refreshed)])
            .in_col(collections::TIER_MEMBERS)
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(&doc_id)
            .object(&doc)
            .add_to_transaction(transaction)?;
    }
    Ok(true)
}

async fn mark_credential_used_in_tx(
    db: firestore::FirestoreDb,
    transaction: &mut FirestoreTransaction<'_>,
    doc_id: String,
    at: DateTime<Utc>,
) -> TxResult<bool> {
    let Some(mut doc) = db
        .fluent()
        .select()
        .by_id_in(collections::CREDENTIALS)
        .obj::<CredentialDoc>()
        .one(&doc_id)
        .await?
    else {
        return Ok(false);
    };

    doc.last_used = Some(at);
    db.fluent()
        .update()
        .fields([firestore::path!(CredentialDoc::last_used)])
        .in_col(collections::CREDENTIALS)
        .precondition(FirestoreWritePrecondition::Exists(true))
        .document_id(&doc_id)
        .object(&doc)
        .add_to_transaction(transaction)?;
    Ok(true)
}

/// Merge standings into the stored competitor, keeping its creation-time
/// fields. Writes the record as-is if it vanished after the insert attempt.
async fn update_competitor_in_tx(
    db: firestore::FirestoreDb,
    transaction: &mut FirestoreTransaction<'_>,
    record: CompetitorRecord,
) -> TxResult<()> {
    let doc_id = record.doc_id();
    let stored: Option<CompetitorRecord> = db
        .fluent()
        .select()
        .by_id_in(collections::COMPETITORS)
        .obj()
        .one(&doc_id)
        .await?;

    let merged = match stored {
        Some(mut stored) => {
            stored.apply_update(&record);
            stored
        }
        None => record,
    };

    db.fluent()
        .update()
        .in_col(collections::COMPETITORS)
        .document_id(&doc_id)
        .object(&merged)
        .add_to_transaction(transaction)?;
    Ok(())
}

fn db_err(e: FirestoreError) -> StoreError {
    StoreError::Backend(e.to_string())
}

// ─── Document shapes ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialDoc {
    id: u64,
    token: String,
    race_id: u64,
    #[serde(default, with = "firestore::serialize_as_optional_timestamp")]
    last_used: Option<DateTime<Utc>>,
    #[serde(with = "firestore::serialize_as_timestamp")]
    updated_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialDoc {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id,
            token: c.token.clone(),
            race_id: c.race_id,
            last_used: c.last_used,
            updated_at: c.updated_at,
        }
    }
}

impl From<CredentialDoc> for Credential {
    fn from(d: CredentialDoc) -> Self {
        Self {
            id: d.id,
            token: d.token,
            race_id: d.race_id,
            last_used: d.last_used,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TierMemberDoc {
    tier: String,
    racer_id: u64,
    #[serde(default, with = "firestore::serialize_as_optional_timestamp")]
    last_refreshed: Option<DateTime<Utc>>,
}

impl From<TierMemberDoc> for TierMember {
    fn from(d: TierMemberDoc) -> Self {
        Self {
            tier: d.tier,
            racer_id: d.racer_id,
            last_refreshed: d.last_refreshed,
        }
    }
}

// ─── Credential Operations ───────────────────────────────────────

#[async_trait]
impl CredentialStore for FirestoreDb {
    async fn list_credentials(&self) -> Result<Vec<Credential>, StoreError> {
        let docs: Vec<CredentialDoc> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::CREDENTIALS)
            .order_by([("id", FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(db_err)?;
        Ok(docs.into_iter().map(Credential::from).collect())
    }

    async fn get_credential(&self, id: u64) -> Result<Option<Credential>, StoreError> {
        let doc: Option<CredentialDoc> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(&id.to_string())
            .await
            .map_err(db_err)?;
        Ok(doc.map(Credential::from))
    }

    async fn put_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(credential.id.to_string())
            .object(&CredentialDoc::from(credential))
            .execute()
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_credential(&self, id: u64) -> Result<bool, StoreError> {
        if self.get_credential(id).await?.is_none() {
            return Ok(false);
        }
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::CREDENTIALS)
            .document_id(id.to_string())
            .execute()
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn set_last_used(&self, id: u64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let doc_id = id.to_string();
        self.get_client()?
            .run_transaction(move |db, transaction| {
                Box::pin(mark_credential_used_in_tx(db, transaction, doc_id.clone(), at))
            })
            .await
            .map_err(db_err)
    }
}

// ─── Tier Membership Operations ──────────────────────────────────

#[async_trait]
impl TierStore for FirestoreDb {
    async fn oldest_member(&self, tier: &str) -> Result<Option<TierMember>, StoreError> {
        let docs: Vec<TierMemberDoc> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::TIER_MEMBERS)
            .filter(|q| q.for_all([q.field("tier").eq(tier)]))
            .order_by([
                ("last_refreshed", FirestoreQueryDirection::Ascending),
                ("racer_id", FirestoreQueryDirection::Ascending),
            ])
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(db_err)?;
        Ok(docs.into_iter().next().map(TierMember::from))
    }

    async fn list_members(&self, tier: &str) -> Result<Vec<TierMember>, StoreError> {
        let docs: Vec<TierMemberDoc> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::TIER_MEMBERS)
            .filter(|q| q.for_all([q.field("tier").eq(tier)]))
            .order_by([("racer_id", FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(db_err)?;
        Ok(docs.into_iter().map(TierMember::from).collect())
    }

    async fn add_member(&self, tier: &str, racer_id: u64) -> Result<bool, StoreError> {
        let doc = TierMemberDoc {
            tier: tier.to_string(),
            racer_id,
            last_refreshed: None,
        };
        let result: Result<TierMemberDoc, FirestoreError> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::TIER_MEMBERS)
            .document_id(tier_member_doc_id(tier, racer_id))
            .object(&doc)
            .execute()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(FirestoreError::DataConflictError(_)) => Ok(false),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn remove_member(&self, tier: &str, racer_id: u64) -> Result<bool, StoreError> {
        if self.get_member_doc(tier, racer_id).await?.is_none() {
            return Ok(false);
        }
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::TIER_MEMBERS)
            .document_id(tier_member_doc_id(tier, racer_id))
            .execute()
            .await
            .map_err(db_err)?;
        Ok(true)
    }

    async fn advance_last_refreshed(
        &self,
        tier: &str,
        racer_id: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.refresh_member(tier, racer_id, RefreshUpdate::Advance(at))
            .await
    }

    async fn set_last_refreshed(
        &self,
        tier: &str,
        racer_id: u64,
        at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.refresh_member(tier, racer_id, RefreshUpdate::Set(at))
            .await
    }

    async fn replace_members(&self, tier: &str, racer_ids: &[u64]) -> Result<(), StoreError> {
        let client = self.get_client()?;
        let existing = self.list_members(tier).await?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to begin transaction: {}", e)))?;

        for member in &existing {
            client
                .fluent()
                .delete()
                .from(collections::TIER_MEMBERS)
                .document_id(tier_member_doc_id(tier, member.racer_id))
                .add_to_transaction(&mut transaction)
                .map_err(db_err)?;
        }

        for &racer_id in racer_ids {
            let doc = TierMemberDoc {
                tier: tier.to_string(),
                racer_id,
                last_refreshed: None,
            };
            client
                .fluent()
                .update()
                .in_col(collections::TIER_MEMBERS)
                .document_id(tier_member_doc_id(tier, racer_id))
                .object(&doc)
                .add_to_transaction(&mut transaction)
                .map_err(db_err)?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| StoreError::Backend(format!("Transaction commit failed: {}", e)))?;

        tracing::debug!(
            tier,
            removed = existing.len(),
            added = racer_ids.len(),
            "Tier members replaced"
        );
        Ok(())
    }
}

// ─── Competitor / Lap Operations ─────────────────────────────────

#[async_trait]
impl RaceStore for FirestoreDb {
    async fn upsert_competitor(
        &self,
        record: &CompetitorRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let client = self.get_client()?;
        let doc_id = record.doc_id();

        let inserted: Result<CompetitorRecord, FirestoreError> = client
            .fluent()
            .insert()
            .into(collections::COMPETITORS)
            .document_id(&doc_id)
            .object(record)
            .execute()
            .await;

        match inserted {
            Ok(_) => return Ok(UpsertOutcome::Inserted),
            Err(FirestoreError::DataConflictError(_)) => {}
            Err(e) => return Err(db_err(e)),
        }

        let record = record.clone();
        client
            .run_transaction(move |db, transaction| {
                Box::pin(update_competitor_in_tx(db, transaction, record.clone()))
            })
            .await
            .map_err(db_err)?;

        Ok(UpsertOutcome::Updated)
    }

    async fn get_competitor(
        &self,
        race_id: u64,
        racer_id: u64,
    ) -> Result<Option<CompetitorRecord>, StoreError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::COMPETITORS)
            .obj()
            .one(&competitor_doc_id(race_id, racer_id))
            .await
            .map_err(db_err)
    }

    async fn insert_lap_if_absent(&self, lap: &LapRecord) -> Result<bool, StoreError> {
        let result: Result<LapRecord, FirestoreError> = self
            .get_client()?
            .fluent()
            .insert()
            .into(collections::COMPETITOR_LAPS)
            .document_id(lap.doc_id())
            .object(lap)
            .execute()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(FirestoreError::DataConflictError(_)) => Ok(false),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Concurrent inserts, bounded to avoid overloading Firestore.
    async fn insert_laps(&self, laps: &[LapRecord]) -> Vec<Result<bool, StoreError>> {
        let inserts: Vec<_> = laps
            .iter()
            .map(|lap| self.insert_lap_if_absent(lap))
            .collect();
        stream::iter(inserts)
            .buffered(MAX_CONCURRENT_DB_OPS)
            .collect()
            .await
    }

    async fn list_laps(&self, race_id: u64, racer_id: u64) -> Result<Vec<LapRecord>, StoreError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::COMPETITOR_LAPS)
            .filter(|q| {
                q.for_all([
                    q.field("race_id").eq(race_id),
                    q.field("racer_id").eq(racer_id),
                ])
            })
            .order_by([("lap_number", FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(db_err)
    }
}
