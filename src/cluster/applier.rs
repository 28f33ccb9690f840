//! Builds and issues the security policy mutation for a single node

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::node::NodeSnapshot;
use crate::client::{ComputeError, Operation, PolicyEndpoint, PolicyRequest};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Node '{0}' has no zone label")]
    MissingZone(String),

    #[error("could not set security policy of instance '{instance}': {source}")]
    Endpoint {
        instance: String,
        #[source]
        source: ComputeError,
    },
}

/// Applies one fixed policy, in one project, to whichever node it is handed
#[derive(Clone)]
pub struct PolicyApplier {
    endpoint: Arc<dyn PolicyEndpoint>,
    project_id: String,
    /// Empty means "clear the policy", not "skip"
    policy_url: String,
}

impl PolicyApplier {
    pub fn new(
        endpoint: Arc<dyn PolicyEndpoint>,
        project_id: impl Into<String>,
        policy_url: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            project_id: project_id.into(),
            policy_url: policy_url.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn policy_url(&self) -> &str {
        &self.policy_url
    }

    /// The request that `apply` would send for this node
    pub fn build_request(&self, node: &NodeSnapshot) -> Result<PolicyRequest, ApplyError> {
        let zone = node
            .zone
            .as_deref()
            .ok_or_else(|| ApplyError::MissingZone(node.name.clone()))?;
        Ok(PolicyRequest::new(
            &self.project_id,
            zone,
            &node.name,
            &self.policy_url,
        ))
    }

    /// Issue exactly one call to the endpoint; errors are returned, not retried
    pub async fn apply(&self, node: &NodeSnapshot) -> Result<Operation, ApplyError> {
        let request = self.build_request(node)?;
        debug!(
            "Setting security policy '{}' on {}/{}",
            request.security_policy, request.zone, request.instance
        );
        self.endpoint
            .set_security_policy(&request)
            .await
            .map_err(|source| ApplyError::Endpoint {
                instance: node.name.clone(),
                source,
            })
    }
}
