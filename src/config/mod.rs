//! Resolved controller settings
//!
//! Combines command-line/environment arguments with values discovered from
//! the GCE metadata server. The selector is parsed here so a malformed
//! selector stops the process at startup instead of failing every
//! reconciliation.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::cli::Args;
use crate::client::{MetadataError, MetadataSource};
use crate::selector::{self, Selector, SelectorError};

/// Base URL that security policy URLs are built on
pub const POLICY_URL_BASE: &str = "https://www.googleapis.com/compute/v1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid selector: {0}")]
    Selector(#[from] SelectorError),

    #[error("Invalid zone '{0}': expected <region>-<zone>, e.g. us-central1-a")]
    InvalidZone(String),

    #[error("Metadata discovery failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Failed to load env file {path}: {message}")]
    EnvFile { path: String, message: String },
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Build the URL of a regional security policy.
///
/// An empty name yields an empty URL, which clears the policy. Values that
/// are already URLs or `projects/...` paths are passed through.
pub fn make_security_policy_url(project_id: &str, region: &str, security_policy: &str) -> String {
    if security_policy.is_empty() {
        return String::new();
    }
    if security_policy.starts_with("https://")
        || security_policy.starts_with("http://")
        || security_policy.starts_with("projects/")
    {
        return security_policy.to_string();
    }
    format!(
        "{}/projects/{}/regions/{}/securityPolicies/{}",
        POLICY_URL_BASE, project_id, region, security_policy
    )
}

/// `us-central1-a` -> `us-central1`
pub fn extract_region_from_zone(zone: &str) -> Result<String, ConfigError> {
    let mut parts = zone.split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(geo), Some(area), Some(_)) if !geo.is_empty() && !area.is_empty() => {
            Ok(format!("{}-{}", geo, area))
        }
        _ => Err(ConfigError::InvalidZone(zone.to_string())),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Settings the controller runs with
#[derive(Debug, Clone)]
pub struct Settings {
    pub selector: Selector,
    /// Empty means the policy is cleared on selected nodes
    pub security_policy_url: String,
    pub project_id: String,
    pub zone: String,
    pub region: String,
    pub compute_endpoint: String,
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub requeue_after: Duration,
    pub health_addr: String,
}

impl Settings {
    /// Resolve settings, asking the metadata server for anything not given
    pub async fn resolve(args: &Args, metadata: &dyn MetadataSource) -> Result<Self, ConfigError> {
        let selector = selector::parse(&args.selector)?;

        let project_id = match non_empty(&args.project_id) {
            Some(project) => project,
            None => metadata.project_id().await?,
        };
        info!("Project ID is {}", project_id);

        let zone = match non_empty(&args.zone) {
            Some(zone) => zone,
            None => metadata.zone().await?,
        };
        let region = extract_region_from_zone(&zone)?;
        info!("Zone is {}, region is {}", zone, region);

        let security_policy_url =
            make_security_policy_url(&project_id, &region, &args.security_policy);

        Ok(Self {
            selector,
            security_policy_url,
            project_id,
            zone,
            region,
            compute_endpoint: args.compute_endpoint.clone(),
            access_token: non_empty(&args.access_token),
            request_timeout: Duration::from_secs(args.request_timeout),
            requeue_after: Duration::from_secs(args.requeue_after),
            health_addr: args.health_addr.clone(),
        })
    }
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load a .env file into the process environment
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
