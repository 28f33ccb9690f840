//! Node Reconciler - decides, per node, whether the security policy is applied
//!
//! Every reconciliation runs the same steps in a fixed order:
//! 1. Fetch the node. A node that no longer exists is a no-op.
//! 2. Skip nodes that already had the policy applied, before looking at labels.
//! 3. Skip nodes the selector does not match. They are not remembered, so a
//!    later label change can still select them.
//! 4. Apply the policy and remember the node only once the call succeeded.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::applier::{ApplyError, PolicyApplier};
use super::node::{FetchError, NodeProvider};
use super::scope::{Interrupted, ReconcileScope};
use super::tracker::ProcessedSet;
use crate::selector::Selector;

/// Errors that send a node back to the scheduler for another attempt
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("could not fetch Node: {0}")]
    Fetch(#[source] FetchError),

    #[error("{0}")]
    Apply(#[from] ApplyError),

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("reconciliation deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for ReconcileError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => ReconcileError::Cancelled,
            Interrupted::DeadlineExceeded => ReconcileError::DeadlineExceeded,
        }
    }
}

/// Terminal result of a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The node was deleted before it could be fetched
    NotFound,
    /// The policy was applied earlier in this process's lifetime
    AlreadyProcessed,
    /// The selector does not match the node's labels
    NoMatch,
    /// The policy was applied by this reconciliation
    Applied,
}

impl Outcome {
    /// True when this reconciliation called the mutation endpoint
    pub fn applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// Reconciles nodes against a selector and a security policy
///
/// Safe to share across concurrent reconciliations of different nodes.
pub struct Reconciler {
    nodes: Arc<dyn NodeProvider>,
    applier: PolicyApplier,
    selector: Arc<Selector>,
    processed: ProcessedSet,
}

impl Reconciler {
    pub fn new(nodes: Arc<dyn NodeProvider>, applier: PolicyApplier, selector: Selector) -> Self {
        Self {
            nodes,
            applier,
            selector: Arc::new(selector),
            processed: ProcessedSet::new(),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn applier(&self) -> &PolicyApplier {
        &self.applier
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// Reconcile one node by name
    ///
    /// Cancellation or deadline expiry during the fetch or the apply call is
    /// returned as an error and leaves the processed set untouched.
    pub async fn reconcile(
        &self,
        name: &str,
        scope: &ReconcileScope,
    ) -> Result<Outcome, ReconcileError> {
        let node = match scope.run(self.nodes.fetch(name)).await? {
            Ok(node) => node,
            Err(FetchError::NotFound(_)) => {
                debug!("Could not find node {}, it was probably deleted", name);
                return Ok(Outcome::NotFound);
            }
            Err(e) => return Err(ReconcileError::Fetch(e)),
        };

        info!(
            "Reconciling node {} (zone: {})",
            node.name,
            node.zone.as_deref().unwrap_or("unknown")
        );

        if self.processed.is_processed(name) {
            debug!("Security policy already set on node {}", name);
            return Ok(Outcome::AlreadyProcessed);
        }

        let is_match = self.selector.matches(&node.labels);
        debug!("Should apply security policy to node {}: {}", name, is_match);
        if !is_match {
            return Ok(Outcome::NoMatch);
        }

        let operation = scope.run(self.applier.apply(&node)).await??;
        self.processed.mark_processed(name);

        info!(
            "Set security policy successfully: node={}, policy={:?}, operation={}",
            name,
            self.applier.policy_url(),
            operation.name
        );
        Ok(Outcome::Applied)
    }
}
