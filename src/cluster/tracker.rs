//! Tracks which nodes have already had the policy applied
//!
//! The set only grows. Entries live until the process exits; a restarted
//! controller re-applies the policy once per node, which is harmless because
//! setting the same policy twice is a no-op at the cloud provider.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Concurrency-safe set of processed node names
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct ProcessedSet {
    /// Node name -> time the policy was first applied
    nodes: Arc<DashMap<String, DateTime<Utc>>>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Mark a node processed; the first recorded time is kept
    pub fn mark_processed(&self, name: &str) {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(Utc::now);
    }

    pub fn processed_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.nodes.get(name).map(|r| *r.value())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Processed node names with their apply times, sorted by name
    pub fn entries(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .nodes
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
