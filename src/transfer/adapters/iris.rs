//! HTTP client for the Iris attestation service

use async_trait::async_trait;
use ethers::types::{Bytes, H256};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::traits::{AttestationOracle, AttestationStatus};
use crate::transfer::error::OracleError;

/// Body of `GET /attestations/{hash}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationResponse {
    pub status: String,
    #[serde(default)]
    pub attestation: Option<String>,
}

impl AttestationResponse {
    /// Map the oracle's status vocabulary onto [`AttestationStatus`]
    pub fn classify(&self) -> Result<AttestationStatus, OracleError> {
        match self.status.to_ascii_lowercase().as_str() {
            "complete" => {
                let raw = self
                    .attestation
                    .as_deref()
                    .filter(|a| !a.eq_ignore_ascii_case("pending"))
                    .ok_or_else(|| OracleError::BadResponse("complete without attestation".to_string()))?;
                raw.parse::<Bytes>()
                    .map(AttestationStatus::Complete)
                    .map_err(|e| OracleError::BadResponse(format!("attestation is not hex: {}", e)))
            }
            "pending" | "pending_confirmations" => Ok(AttestationStatus::Pending),
            "failed" | "rejected" | "error" => Ok(AttestationStatus::Rejected(self.status.clone())),
            other => {
                log::warn!("Unknown attestation status {:?}, treating as pending", other);
                Ok(AttestationStatus::Pending)
            }
        }
    }
}

pub struct IrisOracleClient {
    client: Client,
    base_url: Url,
}

impl IrisOracleClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn attestation_url(&self, message_hash: H256) -> String {
        format!(
            "{}/attestations/{:?}",
            self.base_url.as_str().trim_end_matches('/'),
            message_hash
        )
    }
}

#[async_trait]
impl AttestationOracle for IrisOracleClient {
    async fn fetch_attestation(&self, message_hash: H256) -> Result<AttestationStatus, OracleError> {
        let url = self.attestation_url(message_hash);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Unreachable(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Ok(AttestationStatus::Pending),
            StatusCode::TOO_MANY_REQUESTS => return Err(OracleError::RateLimited),
            s if s.is_server_error() => return Err(OracleError::Unreachable(format!("HTTP {}", s))),
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(OracleError::BadRequest {
                    status: s.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let body: AttestationResponse = response
            .json()
            .await
            .map_err(|e| OracleError::BadResponse(e.to_string()))?;
        log::debug!("Attestation {:?}: status={}", message_hash, body.status);
        body.classify()
    }
}
