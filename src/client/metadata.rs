//! GCE metadata server client
//!
//! Discovers the project and zone the controller runs in, and mints OAuth
//! access tokens for the instance's default service account.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Environment variable that overrides the metadata server host
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

/// Tokens are refreshed this many seconds before they expire
const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metadata server returned {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("Failed to parse metadata response: {0}")]
    Parse(String),
}

/// Where the controller learns its own project and zone
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn project_id(&self) -> Result<String, MetadataError>;
    async fn zone(&self) -> Result<String, MetadataError>;
}

/// Supplies bearer tokens for Compute API calls
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, MetadataError>;
}

/// A fixed token, e.g. from `gcloud auth print-access-token`
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, MetadataError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_EXPIRY_SKEW_SECS) < self.expires_at
    }
}

/// Reduce `projects/123456/zones/us-central1-a` to `us-central1-a`
pub fn zone_from_metadata(value: &str) -> String {
    let value = value.trim();
    value.rsplit('/').next().unwrap_or(value).to_string()
}

/// Base URL of the metadata API for a host
pub fn metadata_base_url(host: &str) -> String {
    format!("http://{}/computeMetadata/v1", host.trim_end_matches('/'))
}

pub struct MetadataClient {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<CachedToken>>,
}

impl MetadataClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token: RwLock::new(None),
        })
    }

    /// Client for the metadata server, honoring `GCE_METADATA_HOST`
    pub fn from_env() -> Result<Self, MetadataError> {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self::new(metadata_base_url(&host))
    }

    async fn get(&self, path: &str) -> Result<String, MetadataError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?.trim().to_string())
    }

    async fn fetch_token(&self) -> Result<CachedToken, MetadataError> {
        let body = self
            .get("instance/service-accounts/default/token")
            .await?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| MetadataError::Parse(e.to_string()))?;
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl MetadataSource for MetadataClient {
    async fn project_id(&self) -> Result<String, MetadataError> {
        let project = self.get("project/project-id").await?;
        if project.is_empty() {
            return Err(MetadataError::Parse("empty project id".to_string()));
        }
        Ok(project)
    }

    async fn zone(&self) -> Result<String, MetadataError> {
        let zone = zone_from_metadata(&self.get("instance/zone").await?);
        if zone.is_empty() {
            return Err(MetadataError::Parse("empty zone".to_string()));
        }
        Ok(zone)
    }
}

#[async_trait]
impl TokenSource for MetadataClient {
    async fn access_token(&self) -> Result<String, MetadataError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *slot = Some(fresh);
        Ok(value)
    }
}
