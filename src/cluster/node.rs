//! Node snapshots and the providers that fetch them
//!
//! A [`NodeSnapshot`] is the slice of a Kubernetes `Node` the reconciler
//! cares about: its name, its labels, and the zone its instance lives in.
//! Providers distinguish a node that no longer exists from a failed lookup,
//! since the former is an expected race against deletion.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use thiserror::Error;

/// Zone label set by GKE on every node
pub const GKE_ZONE_LABEL: &str = "topology.gke.io/zone";

/// Upstream well-known zone label, used when the GKE label is missing
pub const TOPOLOGY_ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Point-in-time view of a node, owned by a single reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub zone: Option<String>,
}

impl NodeSnapshot {
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        let zone = zone_from_labels(&labels);
        Self {
            name: name.into(),
            labels,
            zone,
        }
    }
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        NodeSnapshot::new(node.name_any(), node.labels().clone())
    }
}

fn zone_from_labels(labels: &BTreeMap<String, String>) -> Option<String> {
    [GKE_ZONE_LABEL, TOPOLOGY_ZONE_LABEL]
        .iter()
        .filter_map(|key| labels.get(*key))
        .find(|zone| !zone.is_empty())
        .cloned()
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Node '{0}' not found")]
    NotFound(String),

    #[error("Node provider unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::NotFound(_))
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// Source of current node state, keyed by node name
#[async_trait]
pub trait NodeProvider: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<NodeSnapshot, FetchError>;
}

// ============================================================================
// SBIO: I/O implementations
// ============================================================================

/// Reads nodes from the watch cache shared with the controller
#[derive(Clone)]
pub struct CachedNodeProvider {
    store: Store<Node>,
}

impl CachedNodeProvider {
    pub fn new(store: Store<Node>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeProvider for CachedNodeProvider {
    async fn fetch(&self, name: &str) -> Result<NodeSnapshot, FetchError> {
        self.store
            .get(&ObjectRef::new(name))
            .map(|node| NodeSnapshot::from(node.as_ref()))
            .ok_or_else(|| FetchError::NotFound(name.to_string()))
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
