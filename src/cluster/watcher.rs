//! Node Watcher - turns node watch events into reconciliations
//!
//! Wraps a kube-runtime [`Controller`] over all `Node` objects. The runtime
//! owns event delivery, deduplication, per-object serialization and
//! requeueing; this module only bridges each event to [`Reconciler`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::Store;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::controller::{Outcome, ReconcileError, Reconciler};
use super::scope::ReconcileScope;

/// Configuration for the node watcher
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Delay before a failed node is reconciled again
    pub requeue_after: Duration,
    /// Deadline for each external call made during a reconciliation
    pub call_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_secs(60),
            call_timeout: Duration::from_secs(30),
        }
    }
}

struct WatchContext {
    reconciler: Arc<Reconciler>,
    config: WatchConfig,
    shutdown: CancellationToken,
}

impl WatchContext {
    fn scope(&self) -> ReconcileScope {
        ReconcileScope::new(self.shutdown.child_token()).with_timeout(self.config.call_timeout)
    }
}

/// Action to take after a successful reconciliation
///
/// Nothing about a node changes on its own, so every outcome waits for the
/// next watch event.
pub fn action_for(_outcome: Outcome) -> Action {
    Action::await_change()
}

async fn reconcile_node(
    node: Arc<Node>,
    ctx: Arc<WatchContext>,
) -> Result<Action, ReconcileError> {
    let name = node.name_any();
    let outcome = ctx.reconciler.reconcile(&name, &ctx.scope()).await?;
    debug!("Node {} reconciled: {:?}", name, outcome);
    Ok(action_for(outcome))
}

fn error_policy(node: Arc<Node>, error: &ReconcileError, ctx: Arc<WatchContext>) -> Action {
    warn!(
        "Reconciling node {} failed, retrying in {}s: {}",
        node.name_any(),
        ctx.config.requeue_after.as_secs(),
        error
    );
    Action::requeue(ctx.config.requeue_after)
}

/// Watches nodes and feeds them to a reconciler
pub struct NodeWatcher {
    controller: Controller<Node>,
}

impl NodeWatcher {
    pub fn new(api: Api<Node>) -> Self {
        Self {
            controller: Controller::new(api, watcher::Config::default()),
        }
    }

    /// Cache of watched nodes, shared with the controller
    pub fn store(&self) -> Store<Node> {
        self.controller.store()
    }

    /// Run until the watch ends or `shutdown` is cancelled
    pub async fn run(
        self,
        reconciler: Arc<Reconciler>,
        config: WatchConfig,
        shutdown: CancellationToken,
    ) {
        info!(
            "Node watcher started, selector: '{}', requeue after {}s",
            reconciler.selector(),
            config.requeue_after.as_secs()
        );

        let context = Arc::new(WatchContext {
            reconciler,
            config,
            shutdown: shutdown.clone(),
        });

        let events = self
            .controller
            .run(reconcile_node, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((node, _action)) => debug!("Finished reconciling node {}", node.name),
                    Err(e) => debug!("Controller event error: {}", e),
                }
            });

        tokio::select! {
            _ = events => {
                warn!("Node watch stream ended");
            }
            _ = shutdown.cancelled() => {
                info!("Node watcher shutting down");
            }
        }
    }
}
