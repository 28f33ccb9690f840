use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cluster::Reconciler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the node cache as synced
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
