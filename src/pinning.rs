//! # Pinning Backend
//!
//! Finalized recordings are handed to a remote content-addressed pinning
//! service, which answers with a content identifier (CID). The service is
//! reached through the [`PinningBackend`] trait so the recording pipeline can be
//! exercised against an in-memory double.
//!
//! ## Thread Safety:
//! One client is shared by every session. `reqwest::Client` is a connection pool
//! behind an `Arc`, so concurrent uploads from many sessions need no locking.

use crate::config::PinningConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Content identifier returned by the pinning service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(cid: impl Into<String>) -> Self {
        Self(cid.into())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait PinningBackend: Send + Sync {
    /// Pin `bytes` under `filename` and return its content identifier.
    async fn submit(&self, filename: &str, bytes: Vec<u8>) -> AppResult<ContentId>;

    /// Public URL the pinned content can be fetched from.
    fn retrieval_url(&self, cid: &ContentId) -> String;
}

/// Reply body of `pinFileToIPFS`.
#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pinata `pinFileToIPFS` client.
pub struct PinataClient {
    client: reqwest::Client,
    api_url: String,
    gateway_url: String,
    jwt: String,
}

impl PinataClient {
    pub fn new(config: &PinningConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            jwt: config.jwt.clone(),
        })
    }
}

#[async_trait]
impl PinningBackend for PinataClient {
    async fn submit(&self, filename: &str, bytes: Vec<u8>) -> AppResult<ContentId> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_for(filename))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Pinning(format!("pinning service returned {}: {}", status, body.trim())));
        }

        let pinned: PinResponse = response.json().await?;
        debug!(filename, size, cid = %pinned.ipfs_hash, "Pinned artifact");
        Ok(ContentId::new(pinned.ipfs_hash))
    }

    fn retrieval_url(&self, cid: &ContentId) -> String {
        format!("{}/{}", self.gateway_url, cid)
    }
}

fn mime_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next() {
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieval_url_strips_trailing_slash() {
        let mut config = crate::config::AppConfig::default().pinning;
        config.gateway_url = "https://gateway.example/ipfs/".to_string();
        let client = PinataClient::new(&config).unwrap();
        assert_eq!(
            client.retrieval_url(&ContentId::new("bafyabc")),
            "https://gateway.example/ipfs/bafyabc"
        );
    }

    #[test]
    fn test_pin_response_parsing() {
        let body = r#"{"IpfsHash":"QmXyz","PinSize":1234,"Timestamp":"2024-01-01T00:00:00Z"}"#;
        let parsed: PinResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.ipfs_hash, "QmXyz");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("abc.webm"), "audio/webm");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }
}
