//! Health and status endpoints

pub mod handlers;
pub mod state;

pub use handlers::{create_router, ControllerStatus, NodeStatus};
pub use state::AppState;
