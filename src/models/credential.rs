//! API credential model for storage and the admin API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Race Monitor API credential with usage bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Numeric id (also used as document ID)
    pub id: u64,
    /// Race Monitor API token
    pub token: String,
    /// Race the token is scoped to upstream
    pub race_id: u64,
    /// When this credential last dispatched a call (None = never)
    pub last_used: Option<DateTime<Utc>>,
    /// When the credential was last edited
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// A credential with an empty token can never be selected.
    pub fn is_usable(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Token prefix safe to put in logs and API responses.
    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }
}

/// Mask a token down to its first six characters.
pub fn mask_token(token: &str) -> String {
    if token.is_empty() {
        return "None".to_string();
    }
    let head: String = token.chars().take(6).collect();
    format!("{}...", head)
}
