use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::metadata::{MetadataError, TokenSource};

/// Default base URL of the Compute Engine REST API
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";

/// The network interface a policy is attached to
pub const PRIMARY_NETWORK_INTERFACE: &str = "nic0";

// ============================================================================
// Data structures (pure, no I/O)
// ============================================================================

/// A request to set (or clear) the security policy of one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub project: String,
    pub zone: String,
    pub instance: String,
    /// Policy URL; empty clears the instance's policy
    pub security_policy: String,
    pub network_interfaces: Vec<String>,
}

impl PolicyRequest {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        instance: impl Into<String>,
        security_policy: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            instance: instance.into(),
            security_policy: security_policy.into(),
            network_interfaces: vec![PRIMARY_NETWORK_INTERFACE.to_string()],
        }
    }

    /// Resource path relative to the API base URL
    pub fn path(&self) -> String {
        format!(
            "projects/{}/zones/{}/instances/{}/setSecurityPolicy",
            self.project, self.zone, self.instance
        )
    }

    /// Request body as sent on the wire
    pub fn body(&self) -> InstancesSetSecurityPolicyRequest {
        InstancesSetSecurityPolicyRequest {
            security_policy: self.security_policy.clone(),
            network_interfaces: self.network_interfaces.clone(),
        }
    }
}

/// JSON body of `instances.setSecurityPolicy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancesSetSecurityPolicyRequest {
    pub security_policy: String,
    pub network_interfaces: Vec<String>,
}

/// The long-running operation returned by the Compute API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("Failed to obtain access token: {0}")]
    Token(#[from] MetadataError),
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// The external endpoint that mutates an instance's security policy
#[async_trait]
pub trait PolicyEndpoint: Send + Sync {
    async fn set_security_policy(&self, request: &PolicyRequest)
        -> Result<Operation, ComputeError>;
}

// ============================================================================
// SBIO: I/O implementation (real HTTP client)
// ============================================================================

#[derive(Clone)]
pub struct ComputeClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ComputeClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        timeout: Duration,
    ) -> Result<Self, ComputeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Extract a readable message from a failed API response body
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ if body.trim().is_empty() => "Unknown error".to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl PolicyEndpoint for ComputeClient {
    async fn set_security_policy(
        &self,
        request: &PolicyRequest,
    ) -> Result<Operation, ComputeError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), request.path());
        let token = self.tokens.access_token().await?;

        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request.body())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ComputeError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        response
            .json::<Operation>()
            .await
            .map_err(|e| ComputeError::Parse(e.to_string()))
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
