// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Race Monitor API client.
//!
//! Handles:
//! - Credential rotation (least recently used token per call)
//! - Global rate limiting
//! - Response envelope checking (`Successful` / `Message`)
//! - Decoding into the raw payload types
//!
//! No retries happen here; a failed call fails the caller's tick and the
//! entity stays eligible for the next one.

use crate::models::credential::mask_token;
use crate::models::payload::{
    lenient_u64, RacerResponse, ResultsCompetitorResponse, ResultsSessionResponse,
    SessionResponse,
};
use crate::models::{Credential, RacerDetails, SessionRoster};
use crate::services::credentials::{CredentialError, CredentialPool};
use crate::services::rate_limit::RateLimiter;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

const GET_RACER_PATH: &str = "/v2/Live/GetRacer";
const GET_SESSION_PATH: &str = "/v2/Live/GetSession";
const RESULTS_SESSION_PATH: &str = "/v2/Results/SessionDetails";
const RESULTS_COMPETITOR_PATH: &str = "/v2/Results/CompetitorDetails";

/// Max characters of a bad body echoed into errors and logs.
const BODY_PREVIEW_CHARS: usize = 300;

/// Telemetry call errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl TelemetryError {
    /// Failures that need an operator rather than another attempt.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            TelemetryError::Credentials(CredentialError::NoCredentialsAvailable)
        )
    }
}

/// Raw HTTP response from upstream.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

/// Transport to the telemetry vendor. Swapped out in tests.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// POST to `path` with `query` parameters and an empty body.
    async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TelemetryError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpUpstream {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Transport(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn post(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<UpstreamResponse, TelemetryError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TelemetryError::Transport(format!(
                        "Request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    TelemetryError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TelemetryError::Transport(format!("Failed to read body: {}", e)))?;

        Ok(UpstreamResponse { status, body })
    }
}

/// Success flag and message present on every Race Monitor response.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Successful", default)]
    successful: bool,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// Rate-limited, credential-rotating Race Monitor client.
pub struct TelemetryClient {
    upstream: Arc<dyn Upstream>,
    credentials: Arc<CredentialPool>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl TelemetryClient {
    /// `timeout` bounds each dispatch regardless of what the transport does.
    pub fn new(
        upstream: Arc<dyn Upstream>,
        credentials: Arc<CredentialPool>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Self {
        Self {
            upstream,
            credentials,
            limiter,
            timeout,
        }
    }

    /// Live detail for one racer, in the race the chosen credential covers.
    pub async fn fetch_entity(&self, racer_id: u64) -> Result<RacerDetails, TelemetryError> {
        let (response, credential): (RacerResponse, Credential) = self
            .call(GET_RACER_PATH, |cred| {
                vec![
                    ("raceID", cred.race_id.to_string()),
                    ("racerID", format_racer_id(racer_id)),
                ]
            })
            .await?;

        Ok(RacerDetails {
            race_id: credential.race_id,
            competitor: response.details.competitor,
            laps: response.details.laps.unwrap_or_default(),
        })
    }

    /// Live roster of a race.
    pub async fn fetch_session(&self, race_id: u64) -> Result<SessionRoster, TelemetryError> {
        let (response, _): (SessionResponse, Credential) = self
            .call(GET_SESSION_PATH, |_| vec![("raceID", race_id.to_string())])
            .await?;

        Ok(SessionRoster {
            race_id,
            competitors: response
                .session
                .competitors
                .map(|c| c.into_values().collect())
                .unwrap_or_default(),
        })
    }

    /// Competitor ids of a finished session, in result order.
    pub async fn fetch_results_session(
        &self,
        session_id: u64,
    ) -> Result<Vec<u64>, TelemetryError> {
        let (response, _): (ResultsSessionResponse, Credential) = self
            .call(RESULTS_SESSION_PATH, |_| {
                vec![("sessionID", session_id.to_string())]
            })
            .await?;

        Ok(response
            .session
            .and_then(|s| s.sorted_competitors)
            .unwrap_or_default()
            .iter()
            .map(|c| c.resolved_racer_id())
            .collect())
    }

    /// Final detail (with lap times) for one competitor of a finished session.
    pub async fn fetch_results_competitor(
        &self,
        competitor_id: u64,
    ) -> Result<RacerDetails, TelemetryError> {
        let (response, _): (ResultsCompetitorResponse, Credential) = self
            .call(RESULTS_COMPETITOR_PATH, |_| {
                vec![("competitorID", competitor_id.to_string())]
            })
            .await?;

        let mut competitor = response.competitor.ok_or_else(|| {
            TelemetryError::Decode(format!(
                "CompetitorDetails for {} has no Competitor object",
                competitor_id
            ))
        })?;
        let laps = competitor.lap_times.take().unwrap_or_default();

        Ok(RacerDetails {
            race_id: lenient_u64(&competitor.race_id),
            competitor,
            laps,
        })
    }

    /// One upstream call: acquire and stamp a credential, reserve rate-limit
    /// budget, dispatch, then check and decode the response.
    async fn call<T, F>(&self, path: &str, params: F) -> Result<(T, Credential), TelemetryError>
    where
        T: DeserializeOwned,
        F: FnOnce(&Credential) -> Vec<(&'static str, String)>,
    {
        let credential = self.credentials.acquire_and_mark().await?;
        let waited = self.limiter.reserve().await;

        let mut query = vec![("apiToken", credential.token.clone())];
        query.extend(params(&credential));

        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.upstream.post(path, &query))
            .await
            .unwrap_or_else(|_| {
                Err(TelemetryError::Transport(format!(
                    "no response within {}s",
                    self.timeout.as_secs()
                )))
            });
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(
                    credential_id = credential.id,
                    token = %mask_token(&credential.token),
                    path,
                    error = %e,
                    elapsed_ms,
                    "API call failed"
                );
                return Err(e);
            }
        };

        tracing::info!(
            credential_id = credential.id,
            token = %mask_token(&credential.token),
            race_id = credential.race_id,
            path,
            status = response.status,
            elapsed_ms,
            rate_limit_wait_ms = waited.as_millis() as u64,
            "API call"
        );

        let body = decode_response(path, response)?;
        Ok((body, credential))
    }
}

/// Check status and success flag, then decode the body.
fn decode_response<T: DeserializeOwned>(
    path: &str,
    response: UpstreamResponse,
) -> Result<T, TelemetryError> {
    let value: Option<Value> = serde_json::from_str(&response.body).ok();
    let envelope = value
        .as_ref()
        .and_then(|v| Envelope::deserialize(v).ok());

    if !(200..300).contains(&response.status) {
        if response.status == 429 {
            tracing::warn!(path, "Race Monitor rate limit hit (429)");
        }
        let detail = envelope
            .and_then(|e| e.message)
            .unwrap_or_else(|| preview(&response.body));
        return Err(TelemetryError::Upstream(format!(
            "HTTP {}: {}",
            response.status, detail
        )));
    }

    let Some(value) = value else {
        tracing::error!(path, payload_head = %preview(&response.body), "API JSON error");
        return Err(TelemetryError::Decode(format!(
            "{} returned invalid JSON: {}",
            path,
            preview(&response.body)
        )));
    };

    let envelope = envelope.ok_or_else(|| {
        TelemetryError::Decode(format!("{} returned a non-object response", path))
    })?;
    if !envelope.successful {
        return Err(TelemetryError::Upstream(
            envelope
                .message
                .unwrap_or_else(|| "Unknown failure".to_string()),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| TelemetryError::Decode(format!("{} payload: {}", path, e)))
}

/// Race Monitor expects racer ids as at least three digits.
fn format_racer_id(racer_id: u64) -> String {
    format!("{:03}", racer_id)
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(body: &str) -> UpstreamResponse {
        UpstreamResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_format_racer_id_pads() {
        assert_eq!(format_racer_id(7), "007");
        assert_eq!(format_racer_id(42), "042");
        assert_eq!(format_racer_id(1234), "1234");
    }

    #[test]
    fn test_decode_unsuccessful_carries_message() {
        let err = decode_response::<RacerResponse>(
            GET_RACER_PATH,
            ok(r#"{"Successful": false, "Message": "Invalid API token"}"#),
        )
        .unwrap_err();
        assert!(matches!(err, TelemetryError::Upstream(ref m) if m == "Invalid API token"));
    }

    #[test]
    fn test_decode_missing_success_flag_is_failure() {
        let err = decode_response::<RacerResponse>(GET_RACER_PATH, ok(r#"{"Details": {}}"#))
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Upstream(_)));
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode_response::<RacerResponse>(GET_RACER_PATH, ok("<html>oops</html>"))
            .unwrap_err();
        assert!(matches!(err, TelemetryError::Decode(_)));
    }

    #[test]
    fn test_decode_missing_body_section() {
        let err =
            decode_response::<RacerResponse>(GET_RACER_PATH, ok(r#"{"Successful": true}"#))
                .unwrap_err();
        assert!(matches!(err, TelemetryError::Decode(_)));
    }

    #[test]
    fn test_decode_http_error_status() {
        let err = decode_response::<RacerResponse>(
            GET_RACER_PATH,
            UpstreamResponse {
                status: 429,
                body: "Too Many Requests".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, TelemetryError::Upstream(ref m) if m.contains("429")));
    }

    #[test]
    fn test_decode_racer_details() {
        let response: RacerResponse = decode_response(
            GET_RACER_PATH,
            ok(r#"{
                "Successful": true,
                "Details": {
                    "Competitor": {"RacerID": "7", "Position": "3"},
                    "Laps": [{"Lap": "1", "LapTime": "00:41.200"}]
                }
            }"#),
        )
        .unwrap();
        assert_eq!(response.details.laps.unwrap().len(), 1);
    }

    #[test]
    fn test_no_credentials_is_configuration_fault() {
        let err = TelemetryError::from(CredentialError::NoCredentialsAvailable);
        assert!(err.is_configuration_fault());
        assert!(!TelemetryError::Transport("x".into()).is_configuration_fault());
    }
}
