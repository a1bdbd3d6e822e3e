//! Remote document store over HTTP
//!
//! Protocol (one document per path):
//! - `GET  {url}/{collection}/{document}` → 200 + JSON body + `ETag: "<version>"`, or 404
//! - `PUT` with `If-None-Match: *` → 201 created, 412 already exists
//! - `PUT` with `If-Match: "<version>"` → 200 + new `ETag`, 412 version moved on, 404 missing
//!
//! Credentials come from a JSON file (`{"username": ..., "password": ...}`)
//! and are sent as HTTP basic auth.

use super::{SlotStore, StoreError, Versioned};
use crate::domain::types::SlotRecord;
use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse credentials file {}", path.display()))
    }

    fn authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", encoded)
    }
}

pub struct HttpStore {
    client: reqwest::Client,
    record_url: String,
    authorization: Option<String>,
}

impl HttpStore {
    pub fn new(
        base_url: &str,
        collection: &str,
        document: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .context("Failed to build HTTP client")?;
        let record_url =
            format!("{}/{}/{}", base_url.trim_end_matches('/'), collection, document);
        Ok(Self {
            client,
            record_url,
            authorization: credentials.as_ref().map(Credentials::authorization),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let credentials =
            config.store_credentials_file().map(Credentials::from_file).transpose()?;
        Self::new(
            config.store_url(),
            config.store_collection(),
            config.store_document(),
            credentials,
            config.store_timeout(),
        )
    }

    pub fn record_url(&self) -> &str {
        &self.record_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.authorization {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        }
    }

    fn put(&self, record: &SlotRecord) -> Result<RequestBuilder, StoreError> {
        let body = serde_json::to_vec(record).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(self
            .authorized(self.client.put(&self.record_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body))
    }
}

/// Parse `"7"` (or a bare `7`) into a version number
pub(crate) fn parse_etag(value: &str) -> Option<u64> {
    value.trim().trim_start_matches("W/").trim_matches('"').parse().ok()
}

fn etag_version(response: &reqwest::Response) -> Result<u64, StoreError> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_etag)
        .ok_or_else(|| StoreError::Decode("missing or invalid ETag".to_string()))
}

async fn unexpected(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StoreError::Status { status, body }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

#[async_trait]
impl SlotStore for HttpStore {
    async fn create_if_absent(&self, record: &SlotRecord) -> Result<bool, StoreError> {
        let response =
            self.put(record)?.header(IF_NONE_MATCH, "*").send().await.map_err(transport)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(true),
            StatusCode::PRECONDITION_FAILED => Ok(false),
            _ => Err(unexpected(response).await),
        }
    }

    async fn load(&self) -> Result<Versioned<SlotRecord>, StoreError> {
        let response = self
            .authorized(self.client.get(&self.record_url))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK => {
                let version = etag_version(&response)?;
                let body = response.text().await.map_err(transport)?;
                let value: SlotRecord =
                    serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
                debug!(version = version, available = value.available, "store_record_loaded");
                Ok(Versioned { version, value })
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(unexpected(response).await),
        }
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: &SlotRecord,
    ) -> Result<u64, StoreError> {
        let response = self
            .put(record)?
            .header(IF_MATCH, format!("\"{}\"", expected_version))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => etag_version(&response),
            StatusCode::PRECONDITION_FAILED => {
                Err(StoreError::Conflict { expected: expected_version })
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound),
            _ => Err(unexpected(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_etag() {
        assert_eq!(parse_etag("\"7\""), Some(7));
        assert_eq!(parse_etag("W/\"12\""), Some(12));
        assert_eq!(parse_etag("3"), Some(3));
        assert_eq!(parse_etag("\"abc\""), None);
    }

    #[test]
    fn test_record_url() {
        let store = HttpStore::new(
            "http://store.local:8700/",
            "parkslot",
            "slots",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(store.record_url(), "http://store.local:8700/parkslot/slots");
    }

    #[test]
    fn test_credentials_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"username": "lot", "password": "s3cret"}"#).unwrap();

        let credentials = Credentials::from_file(file.path()).unwrap();
        assert_eq!(credentials.username, "lot");
        // "lot:s3cret"
        assert_eq!(credentials.authorization(), "Basic bG90OnMzY3JldA==");
    }

    #[test]
    fn test_credentials_missing_file() {
        assert!(Credentials::from_file("/nonexistent/key.json").is_err());
    }
}
