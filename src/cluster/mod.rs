//! # Node Policy Reconciliation
//!
//! Keeps the Cloud Armor security policy of GKE node instances in line with a
//! label selector.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐  node name   ┌──────────────────────────────────────┐
//!   │ NodeWatcher  │─────────────▶│              Reconciler              │
//!   │ (kube-runtime│              │                                      │
//!   │  Controller) │              │  fetch ──▶ processed? ──▶ selector?  │
//!   └──────────────┘              │                              │       │
//!                                 │                       PolicyApplier  │
//!                                 └────────┬───────────────────┬─────────┘
//!                                          ▼                   ▼
//!                                   NodeProvider        PolicyEndpoint
//!                                  (watch cache)      (Compute Engine API)
//! ```
//!
//! The processed set is owned by the reconciler and only grows: once the
//! policy has been set on a node it is never set again while the process
//! runs, even if the node's labels later stop matching.

pub mod applier;
pub mod controller;
pub mod node;
pub mod scope;
pub mod tracker;
pub mod watcher;

pub use applier::{ApplyError, PolicyApplier};
pub use controller::{Outcome, ReconcileError, Reconciler};
pub use node::{
    CachedNodeProvider, FetchError, NodeProvider, NodeSnapshot, GKE_ZONE_LABEL, TOPOLOGY_ZONE_LABEL,
};
pub use scope::{Interrupted, ReconcileScope};
pub use tracker::ProcessedSet;
pub use watcher::{NodeWatcher, WatchConfig};
